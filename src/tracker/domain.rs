use url::Url;

/// Extracts the aggregation key for a tab url. Anything without a host (`about:blank`, garbage
/// reported by the host) is kept verbatim, so every tab still lands in some bucket.
pub fn domain_of(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| raw.to_owned())
}
