//! IP geolocation backed by a memory-mapped MaxMind City database.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::analytics::models::GeoLocation;

/// Resolves an IP address to a coarse location. Lookups never fail: an
/// unknown address yields an empty [`GeoLocation`].
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> GeoLocation;
}

/// Lookup used when no database is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownGeoLookup;

impl GeoLookup for UnknownGeoLookup {
    fn lookup(&self, _ip: IpAddr) -> GeoLocation {
        GeoLocation::default()
    }
}

#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a GeoLite2-City or GeoIP2-City `.mmdb` file.
    pub fn new(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;

        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }
}

impl GeoLookup for GeoIpService {
    fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let Ok(result) = self.city_reader.lookup(ip) else {
            return GeoLocation::default();
        };

        match result.decode::<geoip2::City>() {
            Ok(Some(city)) => GeoLocation {
                country: city
                    .country
                    .names
                    .english
                    .or(city.country.iso_code)
                    .map(|s| s.to_string()),
                city: city.city.names.english.map(|s| s.to_string()),
            },
            Ok(None) => GeoLocation::default(),
            Err(e) => {
                tracing::debug!(%ip, error = %e, "failed to decode GeoIP record");
                GeoLocation::default()
            }
        }
    }
}

/// Build the configured lookup, falling back to unknown locations.
pub fn build_geo_lookup(city_path: Option<&str>) -> Result<Arc<dyn GeoLookup>> {
    match city_path {
        Some(path) => {
            let service = GeoIpService::new(path)?;
            tracing::info!(path, "loaded GeoIP City database");
            Ok(Arc::new(service))
        }
        None => {
            tracing::info!("no GeoIP database configured, click locations will be unknown");
            Ok(Arc::new(UnknownGeoLookup))
        }
    }
}
