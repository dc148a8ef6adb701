//! Client IP extraction for click recording.
//!
//! Forwarding headers are only believed as far as the proxy trust settings
//! allow; otherwise the socket peer address is used.

use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            extract_standard_ip(headers, socket_addr, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Prefer RFC 7239 `Forwarded`, fall back to `X-Forwarded-For`.
fn extract_standard_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    let chain = forwarded_chain(headers).or_else(|| x_forwarded_for_chain(headers))?;
    select_from_chain(&chain, socket_addr, config)
}

/// `for=` values of the Forwarded header, left (client) to right (nearest proxy)
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.eq_ignore_ascii_case("for")
                .then(|| parse_forwarded_node(value))
                .flatten()
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Parse a Forwarded node such as `192.0.2.60`, `"192.0.2.60:8080"` or
/// `"[2001:db8::1]:4711"`.
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    value
        .parse()
        .ok()
        .or_else(|| value.rsplit_once(':')?.0.parse::<Ipv4Addr>().ok().map(IpAddr::V4))
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Walk the chain right to left and return the first hop not vouched for.
fn select_from_chain(
    chain: &[IpAddr],
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        return if chain.len() > num_trusted {
            Some(chain[chain.len() - num_trusted - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        let is_trusted = |ip: &IpAddr| config.trusted_proxies.iter().any(|net| net.contains(ip));

        // A header from an untrusted peer is client controlled
        if !is_trusted(&socket_addr) {
            return None;
        }

        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(*ip))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

/// Truncate an address to its network prefix: /24 for IPv4, /48 for IPv6.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let [a, b, c, _] = addr.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
        }
    }
}
