use wildmatch::WildMatch;

/// Ordered set of proxied virtual hostnames.
///
/// Entries are plain hostnames or wildcard patterns (`*.dev.example.com`).
/// Matching is case-insensitive and ignores any `:port` suffix on the
/// candidate host.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    entries: Vec<String>,
    patterns: Vec<WildMatch>,
}

impl HostSet {
    /// Create a new HostSet
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = hosts
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        let patterns = entries.iter().map(|h| WildMatch::new(h)).collect();
        Self { entries, patterns }
    }

    /// Check if a host (optionally carrying a port) is one of the proxied hosts.
    pub fn contains(&self, host: &str) -> bool {
        let host = strip_port(host).to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.patterns.iter().any(|p| p.matches(&host))
    }

    /// The configured hostnames, in configuration order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip a trailing `:port` from a host header value.
///
/// Bracketed IPv6 literals keep their brackets removed, bare IPv6 literals
/// (more than one colon) are returned as-is.
pub fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rfind(':') {
        Some(idx) if host[..idx].find(':').is_none() => &host[..idx],
        _ => host,
    }
}
