//! Interception gate: which connections to MITM and which requests to answer
//! without contacting the origin.

use hudsucker::hyper::{
    header::{self, HeaderValue},
    HeaderMap,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::combo::ComboResolver;
use crate::config::{matches, DevProxyConfig};
use crate::filter::{strip_port, HostSet};
use crate::flow::{header_map, InboundRequest, PendingMock, ResponseEnvelope};
use crate::hooks::{Hooks, IdentityMock, MockBeforeData};
use crate::mock::invoke_mock;

/// Icon served for `/favicon.ico` on proxied hosts.
pub const FAVICON: &[u8] = include_bytes!("../assets/favicon.ico");

/// Top-level per-request decision object.
#[derive(Clone)]
pub struct InterceptionGate {
    config: Arc<DevProxyConfig>,
    hosts: HostSet,
    hooks: Hooks,
    combo: ComboResolver,
}

impl InterceptionGate {
    pub fn new(config: Arc<DevProxyConfig>, hooks: Hooks, combo: ComboResolver) -> Self {
        let hosts = config.host_set();
        Self {
            config,
            hosts,
            hooks,
            combo,
        }
    }

    /// Whether an HTTPS connection to `host_header` should be decrypted.
    ///
    /// Anything else is tunnelled end to end.
    pub fn should_intercept_https(&self, host_header: &str, request_url: &str) -> bool {
        let host = strip_port(host_header);
        if host.is_empty() {
            return false;
        }
        self.hosts.contains(host)
            || self.config.mapped_ip(host).is_some()
            || matches(&self.config.mock_pattern, request_url)
            || matches(&self.config.https_pattern, request_url)
    }

    /// Whether the request is answered locally.
    ///
    /// A `mock_before` hit is cached on the request as a pending mock for
    /// [`produce_local_response`](Self::produce_local_response).
    pub fn should_serve_locally(&self, req: &mut InboundRequest) -> bool {
        if self.is_local_favicon(req) {
            info!(">> Parsing local favicon: {}", req.url);
            return true;
        }
        if self.is_combo(req) {
            info!(">> Parsing combo url: {}", req.url);
            return true;
        }

        let Some(mock_before) = &self.hooks.mock_before else {
            return false;
        };
        let url = req.absolute_url();
        if !matches(&self.config.mock_pattern, &url) {
            return false;
        }
        match mock_before.mock_before(&url) {
            Some(data) => {
                debug!("mock_before answered {}", url);
                req.pending_mock = Some(pending_mock(req, data));
                true
            }
            None => false,
        }
    }

    /// Build the local answer for a request accepted by
    /// [`should_serve_locally`](Self::should_serve_locally).
    pub async fn produce_local_response(&self, req: &mut InboundRequest) -> ResponseEnvelope {
        if let Some(mock) = req.pending_mock.take() {
            let body = invoke_mock(&req.absolute_url(), &mock.headers, &mock.body, &IdentityMock);
            return ResponseEnvelope::new(200, mock.headers, body);
        }

        if self.is_local_favicon(req) {
            let headers = header_map([("content-type", "image/x-icon")]);
            return ResponseEnvelope::new(200, headers, FAVICON);
        }

        if self.is_combo(req) {
            if let Some(mapper) = &self.hooks.combo_map {
                return self.combo.resolve(&req.absolute_url(), mapper.as_ref()).await;
            }
        }

        ResponseEnvelope::new(404, HeaderMap::new(), format!("[!]Error processing {}", req.url))
    }

    fn is_local_favicon(&self, req: &InboundRequest) -> bool {
        let proxied = req.host().map(|h| self.hosts.contains(&h)).unwrap_or(false);
        proxied && req.path() == "/favicon.ico"
    }

    fn is_combo(&self, req: &InboundRequest) -> bool {
        let url = req.absolute_url();
        self.hooks.combo_map.is_some()
            && matches(&self.config.combo.pattern, &url)
            && url.contains(self.combo.delimiter())
    }
}

/// Turn `mock_before` data into a full response, adding default CORS and
/// JSON headers when the hook supplied a bare body.
fn pending_mock(req: &InboundRequest, data: MockBeforeData) -> PendingMock {
    match data {
        MockBeforeData::Response { headers, body } => PendingMock {
            headers: header_map(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            body,
        },
        MockBeforeData::Body(value) => {
            let mut headers = HeaderMap::new();
            if let Some(origin) = req.headers.get(header::ORIGIN) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            }
            let defaults = [
                (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, "GET,PUT,POST"),
                (
                    header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    "Origin,X-Requested-With,Content-Type,Accept",
                ),
                (header::CONTENT_TYPE, "application/json;charset=UTF-8"),
            ];
            for (name, value) in defaults {
                headers.insert(name, HeaderValue::from_static(value));
            }
            let body = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            PendingMock { headers, body }
        }
    }
}
