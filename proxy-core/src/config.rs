//! Configuration types and utilities

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProxyError;
use crate::filter::HostSet;
use crate::Result;

/// In-app browser bridge script injected into proxied pages by default.
pub const DEFAULT_INJECT_SCRIPT: &str = "https://g.alicdn.com/mtb/lib-windvane/2.1.8/windvane.js";

/// Combo URL delimiter between the shared prefix and the asset list.
pub const COMBO_SIGN: &str = "??";

/// Separator between the assets of a combo URL.
pub const COMBO_SEP: &str = ",";

/// A regular expression tested against request URLs.
///
/// Serialized as its source string.
#[derive(Clone)]
pub struct UrlPattern(Regex);

impl UrlPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| ProxyError::Configuration(format!("Invalid pattern {:?}: {}", pattern, e)))
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.0.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UrlPattern({:?})", self.0.as_str())
    }
}

impl Serialize for UrlPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for UrlPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source).map(Self).map_err(serde::de::Error::custom)
    }
}

/// Test an optional pattern; an absent pattern never matches.
pub fn matches(pattern: &Option<UrlPattern>, url: &str) -> bool {
    pattern.as_ref().map(|p| p.is_match(url)).unwrap_or(false)
}

/// Combo asset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboConfig {
    /// URLs eligible for combo splitting
    pub pattern: Option<UrlPattern>,
    /// Token between the combo prefix and the asset list
    pub delimiter: String,
    /// Token between assets in the list
    pub separator: String,
    /// Budget for each local and each remote fetch attempt
    pub timeout_secs: u64,
}

impl Default for ComboConfig {
    fn default() -> Self {
        Self {
            pattern: None,
            delimiter: COMBO_SIGN.to_string(),
            separator: COMBO_SEP.to_string(),
            timeout_secs: 10,
        }
    }
}

impl ComboConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rules deciding which proxied-host paths are answered by the local static server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalServeConfig {
    /// Build output public-path prefixes (e.g. `/build/`)
    pub public_paths: Vec<String>,
    /// Extra path patterns routed to the local server
    pub patterns: Vec<UrlPattern>,
}

fn lowercase_keys<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error> {
    let map = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .map(|(host, ip)| (host.to_ascii_lowercase(), ip))
        .collect())
}

/// Development proxy configuration.
///
/// Supplied once at startup and treated as immutable for the lifetime of the
/// pipeline; each handler holds an `Arc` to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevProxyConfig {
    /// Proxied virtual hostnames
    pub hosts: Vec<String>,
    /// Hostname to IP address overrides, keyed by lowercase hostname
    #[serde(deserialize_with = "lowercase_keys")]
    pub hosts_map: BTreeMap<String, String>,
    /// Requests eligible for API mocking
    pub mock_pattern: Option<UrlPattern>,
    /// Extra URLs whose HTTPS connections are intercepted
    pub https_pattern: Option<UrlPattern>,
    /// Pages eligible for HTML rewriting on non-proxied hosts
    pub html_intercept_pattern: Option<UrlPattern>,
    /// Combo asset settings
    pub combo: ComboConfig,
    /// Local content root
    pub content_base: PathBuf,
    /// Local routing rules
    pub local: LocalServeConfig,
    /// Port of the local static server
    pub server_port: u16,
    /// Port the proxy listens on
    pub proxy_port: u16,
    /// Address the proxy listens on
    pub listen_address: String,
    /// Inject permissive CORS headers into responses
    pub cors_inject: bool,
    /// Script prepended to `<head>` for matching user agents
    pub inject_script: Option<String>,
    /// User agents that receive the injected script
    pub inject_user_agent: UrlPattern,
    /// Root CA directory
    pub cert_dir: PathBuf,
}

impl Default for DevProxyConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            hosts_map: BTreeMap::new(),
            mock_pattern: None,
            https_pattern: None,
            html_intercept_pattern: None,
            combo: ComboConfig::default(),
            content_base: PathBuf::from("."),
            local: LocalServeConfig::default(),
            server_port: 8081,
            proxy_port: 8080,
            listen_address: "127.0.0.1".to_string(),
            cors_inject: false,
            inject_script: Some(DEFAULT_INJECT_SCRIPT.to_string()),
            inject_user_agent: UrlPattern(Regex::new("(?i)WindVane").expect("static pattern")),
            cert_dir: PathBuf::from("./certs"),
        }
    }
}

impl DevProxyConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ProxyError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.combo.delimiter.is_empty() || self.combo.separator.is_empty() {
            return Err(ProxyError::Configuration(
                "combo delimiter and separator must be non-empty".to_string(),
            ));
        }
        for (host, ip) in &self.hosts_map {
            ip.parse::<IpAddr>().map_err(|_| {
                ProxyError::Configuration(format!(
                    "hosts_map entry {} => {} is not an IP",
                    host, ip
                ))
            })?;
        }
        Ok(())
    }

    pub fn host_set(&self) -> HostSet {
        HostSet::new(self.hosts.iter().cloned())
    }

    /// Mapped IP for a hostname (port and case ignored).
    pub fn mapped_ip(&self, host: &str) -> Option<&str> {
        self.hosts_map
            .get(&crate::filter::strip_port(host).to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DevProxyConfig::default();
        assert_eq!(config.server_port, 8081);
        assert_eq!(config.proxy_port, 8080);
        assert_eq!(config.combo.delimiter, "??");
        assert_eq!(config.combo.separator, ",");
        assert_eq!(config.combo.timeout(), Duration::from_secs(10));
        assert!(config.inject_user_agent.is_match("Mozilla/5.0 windvane/8.0"));
        assert!(!matches(&config.mock_pattern, "https://api.example.com/"));
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: DevProxyConfig = serde_json::from_str(
            r#"{
                "hosts": ["dev.m.example.com"],
                "hosts_map": {"api.example.com": "10.0.0.8"},
                "mock_pattern": "api\\.(waptest|m)\\.example\\.com",
                "combo": {"pattern": "g\\.cdn\\.com"},
                "server_port": 9001
            }"#,
        )
        .unwrap();

        assert_eq!(config.hosts, vec!["dev.m.example.com"]);
        assert_eq!(config.mapped_ip("api.example.com:443"), Some("10.0.0.8"));
        assert!(matches(&config.mock_pattern, "https://api.m.example.com/h5/x"));
        assert!(matches(&config.combo.pattern, "https://g.cdn.com/??a.js,b.js"));
        assert_eq!(config.combo.delimiter, "??");
        assert_eq!(config.server_port, 9001);
        config.validate().unwrap();
    }

    #[test]
    fn test_hosts_map_ignores_case() {
        let config: DevProxyConfig =
            serde_json::from_str(r#"{"hosts_map": {"API.Internal.COM": "10.1.2.3"}}"#).unwrap();
        assert!(config.hosts_map.contains_key("api.internal.com"));
        assert_eq!(config.mapped_ip("api.internal.com"), Some("10.1.2.3"));
        assert_eq!(config.mapped_ip("Api.INTERNAL.com:443"), Some("10.1.2.3"));
        assert_eq!(config.mapped_ip("other.internal.com"), None);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result: std::result::Result<DevProxyConfig, _> =
            serde_json::from_str(r#"{"mock_pattern": "("}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_hosts_map() {
        let mut config = DevProxyConfig::default();
        config
            .hosts_map
            .insert("api.example.com".to_string(), "not-an-ip".to_string());
        assert!(matches!(config.validate(), Err(ProxyError::Configuration(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devproxy.json");
        std::fs::write(&path, r#"{"hosts": ["a.dev.com"], "cors_inject": true}"#).unwrap();

        let config = DevProxyConfig::load(&path).unwrap();
        assert!(config.cors_inject);
        assert!(config.host_set().contains("a.dev.com:80"));
    }
}
