//! Per-request data carried through the interception pipeline.
//!
//! Every value here is created for one inbound request, owned by that
//! request's handler and dropped once the response has been flushed.

use bytes::Bytes;
use hudsucker::hyper::{
    header::{self, HeaderName, HeaderValue},
    HeaderMap, Method,
};
use url::Url;

/// Mock payload cached by the interception gate for the local responder.
#[derive(Debug, Clone)]
pub struct PendingMock {
    pub headers: HeaderMap,
    pub body: String,
}

/// Request as received from the browser.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Absolute or path-only URL
    pub url: String,
    pub headers: HeaderMap,
    /// Whether the browser connection is TLS-encrypted
    pub encrypted: bool,
    /// Set by the gate when a `mock_before` hook answered this request
    pub pending_mock: Option<PendingMock>,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        url: impl Into<String>,
        headers: HeaderMap,
        encrypted: bool,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
            encrypted,
            pending_mock: None,
        }
    }

    /// Convenience constructor for a GET without headers.
    pub fn get(url: impl Into<String>) -> Self {
        let url = url.into();
        let encrypted = url.starts_with("https://");
        Self::new(Method::GET, url, HeaderMap::new(), encrypted)
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.encrypted {
            "https"
        } else {
            "http"
        }
    }

    /// Host header, falling back to the URL authority.
    pub fn host(&self) -> Option<String> {
        self.header(header::HOST.as_str())
            .map(str::to_string)
            .or_else(|| {
                Url::parse(&self.url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
            })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The request URL promoted to absolute form.
    ///
    /// A path-only URL is qualified with the connection scheme and the
    /// `Host` header.
    pub fn absolute_url(&self) -> String {
        if self.url.starts_with('/') {
            let host = self.header(header::HOST.as_str()).unwrap_or_default();
            format!("{}://{}{}", self.scheme(), host, self.url)
        } else {
            self.url.clone()
        }
    }

    /// Path component (query stripped) of the request URL.
    pub fn path(&self) -> String {
        match Url::parse(&self.absolute_url()) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.url.split('?').next().unwrap_or_default().to_string(),
        }
    }
}

/// Outbound connection target about to be sent to an origin.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
    /// Path plus query
    pub path: String,
    pub headers: HeaderMap,
    /// Original URL, tagged when the request is redirected to the local server
    pub original_url: Option<String>,
}

impl RequestOptions {
    /// Derive options from an absolute URL.
    pub fn from_url(url: &str, headers: HeaderMap) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let hostname = parsed.host_str()?.to_string();
        let port = parsed.port_or_known_default()?;
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };
        Some(Self {
            scheme: parsed.scheme().to_string(),
            hostname,
            port,
            path,
            headers,
            original_url: None,
        })
    }

    /// Absolute URL of the (possibly rewritten) connection target.
    pub fn url(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        let host = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        if self.port == default_port {
            format!("{}://{}{}", self.scheme, host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, host, self.port, self.path)
        }
    }
}

/// Response as returned by the origin or the local responder.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseEnvelope {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        self.headers.contains_key(header::LOCATION)
    }

    /// Declared charset, lowercased; `utf-8` when absent.
    pub fn charset(&self) -> String {
        charset_of(self.content_type().unwrap_or_default())
    }
}

/// Extract the `charset=` parameter of a content type, lowercased.
pub fn charset_of(content_type: &str) -> String {
    let lower = content_type.to_ascii_lowercase();
    lower
        .split_once("charset=")
        .map(|(_, rest)| {
            rest.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "utf-8".to_string())
}

/// Build a header map from string pairs, skipping invalid entries.
pub fn header_map<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}
