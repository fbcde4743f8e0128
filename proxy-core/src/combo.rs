//! Combo asset splitting with per-asset local/remote fallback.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::join_all;
use hudsucker::hyper::{
    header::{self, HeaderValue},
    HeaderMap,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::config::DevProxyConfig;
use crate::error::ProxyError;
use crate::flow::ResponseEnvelope;
use crate::hooks::ComboMapper;
use crate::Result;

/// Body and metadata of a fetched asset.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Issues GET requests for combo constituents.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// [`AssetFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(FetchedAsset {
            status,
            content_type,
            body,
        })
    }
}

/// A combo URL split into its constituents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboRequest {
    pub url: String,
    /// Remote constituent URLs, in combo order
    pub remote_parts: Vec<String>,
    /// Index-aligned local paths
    pub local_paths: Vec<String>,
}

/// Split `url` on `delimiter` and `separator` into remote constituent URLs.
///
/// Returns `None` when the URL carries no delimiter.
pub fn split_combo(url: &str, delimiter: &str, separator: &str) -> Option<Vec<String>> {
    let (prefix, list) = url.split_once(delimiter)?;
    Some(
        list.split(separator)
            .filter(|s| !s.is_empty())
            .map(|suffix| format!("{}{}", prefix, suffix))
            .collect(),
    )
}

/// Resolved body of one combo slot.
struct Slot {
    body: Bytes,
    content_type: Option<String>,
}

/// Splits combo requests and assembles the combined response.
#[derive(Clone)]
pub struct ComboResolver {
    fetcher: Arc<dyn AssetFetcher>,
    delimiter: String,
    separator: String,
    local_base: Url,
    timeout: Duration,
}

impl ComboResolver {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        delimiter: impl Into<String>,
        separator: impl Into<String>,
        local_base: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            delimiter: delimiter.into(),
            separator: separator.into(),
            local_base,
            timeout,
        }
    }

    /// Resolver targeting the configured local static server.
    pub fn from_config(config: &DevProxyConfig, fetcher: Arc<dyn AssetFetcher>) -> Result<Self> {
        let local_base = Url::parse(&format!("http://127.0.0.1:{}/", config.server_port))
            .map_err(|e| ProxyError::Configuration(format!("Invalid local server URL: {}", e)))?;
        Ok(Self::new(
            fetcher,
            config.combo.delimiter.clone(),
            config.combo.separator.clone(),
            local_base,
            config.combo.timeout(),
        ))
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Split `url` and map its constituents to local paths.
    pub fn plan(&self, url: &str, mapper: &dyn ComboMapper) -> Result<ComboRequest> {
        let remote_parts = split_combo(url, &self.delimiter, &self.separator).unwrap_or_default();
        let local_paths = mapper.map_local(url, &remote_parts);
        if local_paths.len() != remote_parts.len() {
            return Err(ProxyError::ComboMismatch {
                url: url.to_string(),
                remote: remote_parts.len(),
                local: local_paths.len(),
            });
        }
        Ok(ComboRequest {
            url: url.to_string(),
            remote_parts,
            local_paths,
        })
    }

    /// Fetch every constituent and join the bodies with newlines.
    ///
    /// Each slot tries the local server, then the remote URL, then degrades
    /// to a console-error stub. Slots resolve concurrently; output order is
    /// the combo order. The content type is the first successful slot's.
    pub async fn resolve(&self, url: &str, mapper: &dyn ComboMapper) -> ResponseEnvelope {
        let combo = match self.plan(url, mapper) {
            Ok(combo) => combo,
            Err(e) => {
                error!("{}", e);
                return ResponseEnvelope::new(500, HeaderMap::new(), format!("[!]{}", e));
            }
        };

        let slots = combo
            .local_paths
            .iter()
            .zip(combo.remote_parts.iter())
            .map(|(local, remote)| self.resolve_slot(local, remote));
        let slots = join_all(slots).await;

        let content_type = slots.iter().find_map(|s| s.content_type.clone());
        let mut body = BytesMut::new();
        for (idx, slot) in slots.iter().enumerate() {
            if idx > 0 {
                body.extend_from_slice(b"\n");
            }
            body.extend_from_slice(&slot.body);
        }

        let mut headers = HeaderMap::new();
        if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        ResponseEnvelope::new(200, headers, body.freeze())
    }

    async fn resolve_slot(&self, local_path: &str, remote_url: &str) -> Slot {
        match self.local_base.join(local_path) {
            Ok(local_url) => {
                info!(">> request {} from <local>: {}", local_path, local_url);
                if let Some(slot) = self.try_fetch(local_url.as_str()).await {
                    return slot;
                }
            }
            Err(e) => warn!("Invalid local combo path {}: {}", local_path, e),
        }

        info!(">> request {} from <remote>: {}", local_path, remote_url);
        if let Some(slot) = self.try_fetch(remote_url).await {
            return slot;
        }

        Slot {
            body: Bytes::from(format!(
                ";console.error(\"Error loading {} from remote {}\");",
                local_path, remote_url
            )),
            content_type: None,
        }
    }

    async fn try_fetch(&self, url: &str) -> Option<Slot> {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(url)).await {
            Ok(Ok(asset)) if asset.status == 200 => Some(Slot {
                body: asset.body,
                content_type: asset.content_type,
            }),
            Ok(Ok(asset)) => {
                warn!("Combo fetch {} returned status {}", url, asset.status);
                None
            }
            Ok(Err(e)) => {
                warn!("Combo fetch {} failed: {}", url, e);
                None
            }
            Err(_) => {
                warn!("Combo fetch {} timed out after {:?}", url, self.timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves fixed responses keyed by URL; anything else is a 404.
    struct FakeFetcher {
        assets: HashMap<String, (&'static str, &'static str)>,
        hang: Option<String>,
    }

    impl FakeFetcher {
        fn new(assets: &[(&str, &'static str, &'static str)]) -> Self {
            Self {
                assets: assets
                    .iter()
                    .map(|(u, ct, b)| (u.to_string(), (*ct, *b)))
                    .collect(),
                hang: None,
            }
        }
    }

    #[async_trait]
    impl AssetFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            if self.hang.as_deref() == Some(url) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            match self.assets.get(url) {
                Some((ct, body)) => Ok(FetchedAsset {
                    status: 200,
                    content_type: Some(ct.to_string()),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                None if url.contains("unreachable") => {
                    Err(ProxyError::Network("connection refused".to_string()))
                }
                None => Ok(FetchedAsset {
                    status: 404,
                    content_type: None,
                    body: Bytes::new(),
                }),
            }
        }
    }

    fn resolver(fetcher: FakeFetcher) -> ComboResolver {
        ComboResolver::new(
            Arc::new(fetcher),
            "??",
            ",",
            Url::parse("http://127.0.0.1:8081/").unwrap(),
            Duration::from_millis(200),
        )
    }

    fn to_local(_url: &str, parts: &[String]) -> Vec<String> {
        parts
            .iter()
            .map(|p| p.replace("https://g.cdn.com/app/", "build/"))
            .collect()
    }

    #[test]
    fn test_split_combo() {
        let parts = split_combo("https://g.cdn.com/app/??a.js,b/c.js,", "??", ",").unwrap();
        assert_eq!(
            parts,
            vec!["https://g.cdn.com/app/a.js", "https://g.cdn.com/app/b/c.js"]
        );
        assert!(split_combo("https://g.cdn.com/app/a.js", "??", ",").is_none());
    }

    #[tokio::test]
    async fn test_resolution_is_index_preserving() {
        let fetcher = FakeFetcher::new(&[
            ("http://127.0.0.1:8081/build/a.js", "application/javascript", "A"),
            ("https://g.cdn.com/app/b.js", "text/javascript", "REMOTE_B"),
            ("http://127.0.0.1:8081/build/c.js", "application/javascript", "C"),
        ]);
        let res = resolver(fetcher)
            .resolve("https://g.cdn.com/app/??a.js,b.js,c.js", &to_local)
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(&res.body[..], b"A\nREMOTE_B\nC");
        assert_eq!(res.content_type(), Some("application/javascript"));
    }

    #[tokio::test]
    async fn test_missing_everywhere_degrades_to_stub() {
        let fetcher = FakeFetcher::new(&[(
            "http://127.0.0.1:8081/build/a.js",
            "application/javascript",
            "A",
        )]);
        let res = resolver(fetcher)
            .resolve("https://g.cdn.com/app/??a.js,b.js", &to_local)
            .await;

        let body = String::from_utf8(res.body.to_vec()).unwrap();
        assert_eq!(
            body,
            "A\n;console.error(\"Error loading build/b.js from remote https://g.cdn.com/app/b.js\");"
        );
    }

    #[tokio::test]
    async fn test_local_timeout_falls_back_to_remote() {
        let mut fetcher = FakeFetcher::new(&[(
            "https://g.cdn.com/app/b.js",
            "text/javascript",
            "REMOTE_B",
        )]);
        fetcher.hang = Some("http://127.0.0.1:8081/build/b.js".to_string());
        let res = resolver(fetcher)
            .resolve("https://g.cdn.com/app/??b.js", &to_local)
            .await;

        assert_eq!(&res.body[..], b"REMOTE_B");
        assert_eq!(res.content_type(), Some("text/javascript"));
    }

    #[tokio::test]
    async fn test_network_errors_degrade_to_stub() {
        let res = resolver(FakeFetcher::new(&[]))
            .resolve("https://unreachable.cdn.com/lib/??x.js", &to_local)
            .await;

        assert_eq!(res.status, 200);
        let body = String::from_utf8(res.body.to_vec()).unwrap();
        let expected = ";console.error(\"Error loading https://unreachable.cdn.com/lib/x.js";
        assert!(body.starts_with(expected));
        assert!(res.content_type().is_none());
    }

    #[tokio::test]
    async fn test_length_mismatch_is_reported() {
        let short = |_url: &str, _parts: &[String]| vec!["build/a.js".to_string()];
        let r = resolver(FakeFetcher::new(&[]));

        let err = r.plan("https://g.cdn.com/app/??a.js,b.js", &short).unwrap_err();
        assert!(matches!(err, ProxyError::ComboMismatch { remote: 2, local: 1, .. }));

        let res = r.resolve("https://g.cdn.com/app/??a.js,b.js", &short).await;
        assert_eq!(res.status, 500);
    }
}
