//! Outbound request-option rewriting: local serving and host→IP mapping.

use hudsucker::hyper::header::{HeaderValue, IF_NONE_MATCH};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::DevProxyConfig;
use crate::filter::HostSet;
use crate::flow::RequestOptions;
use crate::html::ssi::normalize;

/// Sent on every locally served request so the static server never answers
/// with a 304 left over from a previous run.
const CACHE_BUSTER: &str = "no-match-for-this";

/// Rewrites the connection target of outbound requests.
#[derive(Debug, Clone)]
pub struct RequestOptionRewriter {
    config: Arc<DevProxyConfig>,
    hosts: HostSet,
    content_root: PathBuf,
}

impl RequestOptionRewriter {
    pub fn new(config: Arc<DevProxyConfig>) -> Self {
        let hosts = config.host_set();
        let content_root = absolute(&config.content_base);
        Self {
            config,
            hosts,
            content_root,
        }
    }

    /// Apply at most one rewrite to `options`.
    ///
    /// A proxied host whose path is served locally is sent to the local
    /// static server; otherwise a mapped host is sent to its IP.
    pub fn rewrite(&self, mut options: RequestOptions) -> RequestOptions {
        let host = options.hostname.clone();

        if self.hosts.contains(&host) && self.serves_locally(&options.path) {
            info!("[Proxy Host] {} => localhost", host);
            options.original_url = Some(options.url());
            options.scheme = "http".to_string();
            options.hostname = "localhost".to_string();
            options.port = self.config.server_port;
            options
                .headers
                .insert(IF_NONE_MATCH, HeaderValue::from_static(CACHE_BUSTER));
            return options;
        }

        if host != "localhost" {
            if let Some(ip) = self.config.mapped_ip(&host) {
                info!("[Proxy Hosts] {} => {}", host, ip);
                options.hostname = ip.to_string();
            }
        }
        options
    }

    /// Whether `path` (query ignored) is answered by the local static server.
    pub fn serves_locally(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();

        if self.exists_under_root(path) {
            return true;
        }
        if self
            .config
            .local
            .public_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
        {
            return true;
        }
        self.config.local.patterns.iter().any(|p| p.is_match(path))
    }

    fn exists_under_root(&self, path: &str) -> bool {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return false;
        }
        let candidate = normalize(&self.content_root.join(relative));
        candidate.starts_with(&self.content_root) && candidate.is_file()
    }
}

/// `path` made absolute against the working directory, lexically normalized.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}
