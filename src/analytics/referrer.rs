use url::Url;

const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("google", "Google"),
    ("baidu", "Baidu"),
    ("bing", "Bing"),
    ("facebook", "Facebook"),
    ("twitter", "Twitter"),
    ("weibo", "Weibo"),
    ("wechat", "WeChat"),
];

/// Group a raw `Referer` header into a traffic source label.
pub fn classify_referrer(referer: Option<&str>) -> String {
    let Some(raw) = referer.map(str::trim).filter(|r| !r.is_empty()) else {
        return "Direct".to_string();
    };

    let Some(domain) = referrer_domain(raw) else {
        return "Unknown".to_string();
    };

    let lower = domain.to_ascii_lowercase();
    KNOWN_SOURCES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| (*label).to_string())
        .unwrap_or(domain)
}

/// `host[:port]` without a leading `www.`
fn referrer_domain(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
