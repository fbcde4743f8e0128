use crate::flow::{InboundRequest, RequestOptions, ResponseEnvelope};
use crate::gate::InterceptionGate;
use crate::headers::rewrite_response_headers;
use crate::pipeline::ResponsePipeline;
use crate::rewriter::RequestOptionRewriter;
use hudsucker::{
    decode_response,
    hyper::{body, header, Body, Method, Request, Response, StatusCode, Uri},
    HttpContext, HttpHandler, RequestOrResponse,
};
use tracing::{debug, warn};

/// Bridges the interception stages into the proxy engine.
///
/// The engine clones the handler for every request, so the request tracked
/// between `handle_request` and `handle_response` lives in the handler value.
#[derive(Clone)]
pub struct DevProxyHandler {
    gate: InterceptionGate,
    rewriter: RequestOptionRewriter,
    pipeline: ResponsePipeline,
    cors_inject: bool,
    current: Option<InboundRequest>,
}

impl DevProxyHandler {
    pub fn new(
        gate: InterceptionGate,
        rewriter: RequestOptionRewriter,
        pipeline: ResponsePipeline,
        cors_inject: bool,
    ) -> Self {
        Self {
            gate,
            rewriter,
            pipeline,
            cors_inject,
            current: None,
        }
    }

    /// Decide whether a CONNECT tunnel is decrypted.
    pub fn intercepts(&self, req: &Request<Body>) -> bool {
        let host = req
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let intercept = self.gate.should_intercept_https(&host, &req.uri().to_string());
        debug!("CONNECT {} intercept={}", host, intercept);
        intercept
    }

    /// Answer locally or rewrite the outbound target.
    pub async fn on_request(&mut self, mut req: Request<Body>) -> RequestOrResponse {
        self.current = None;
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        // permessage-deflate frames are not handled by the engine
        req.headers_mut().remove("sec-websocket-extensions");

        let encrypted = req.uri().scheme_str() == Some("https");
        let mut inbound = InboundRequest::new(
            req.method().clone(),
            req.uri().to_string(),
            req.headers().clone(),
            encrypted,
        );

        if self.gate.should_serve_locally(&mut inbound) {
            let envelope = self.gate.produce_local_response(&mut inbound).await;
            return RequestOrResponse::Response(into_response(envelope));
        }

        let options = RequestOptions::from_url(&inbound.absolute_url(), req.headers().clone());
        if let Some(options) = options {
            let options = self.rewriter.rewrite(options);
            match options.url().parse::<Uri>() {
                Ok(uri) => {
                    *req.uri_mut() = uri;
                    *req.headers_mut() = options.headers;
                }
                Err(e) => warn!("Rewritten target {} is not a valid URI: {}", options.url(), e),
            }
        }

        self.current = Some(inbound);
        RequestOrResponse::Request(req)
    }

    /// Rewrite headers and, when a rewrite track applies, the body.
    pub async fn on_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(inbound) = self.current.take() else {
            return res;
        };

        let (mut parts, body) = res.into_parts();
        rewrite_response_headers(&mut parts.headers, self.cors_inject);

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !self.pipeline.applies(&inbound, content_type.as_deref()) {
            return Response::from_parts(parts, body);
        }

        let decoded = match decode_response(Response::from_parts(parts, body)) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Failed to decode response for {}: {}", inbound.url, e);
                return bad_gateway(&inbound.url);
            }
        };
        let (mut parts, stream) = decoded.into_parts();
        let bytes = match body::to_bytes(stream).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read response body for {}: {}", inbound.url, e);
                return bad_gateway(&inbound.url);
            }
        };

        let envelope = ResponseEnvelope::new(parts.status.as_u16(), parts.headers.clone(), bytes);
        let rewritten = self.pipeline.rewrite(&inbound, envelope).await;

        parts.headers = rewritten.headers;
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(rewritten.body))
    }
}

#[async_trait::async_trait]
impl HttpHandler for DevProxyHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.on_request(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.on_response(res).await
    }

    async fn should_intercept(&mut self, _ctx: &HttpContext, req: &Request<Body>) -> bool {
        self.intercepts(req)
    }
}

pub fn into_response(envelope: ResponseEnvelope) -> Response<Body> {
    let mut res = Response::new(Body::from(envelope.body));
    *res.status_mut() =
        StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *res.headers_mut() = envelope.headers;
    res
}

fn bad_gateway(url: &str) -> Response<Body> {
    let mut res = Response::new(Body::from(format!("[!]Error processing {}", url)));
    *res.status_mut() = StatusCode::BAD_GATEWAY;
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combo::{ComboResolver, HttpAssetFetcher};
    use crate::config::{DevProxyConfig, UrlPattern};
    use crate::hooks::{Hooks, MockFunction, MockResponse};
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Flag;

    impl MockFunction for Flag {
        fn mock(&self, _url: &str, response: MockResponse<'_>) -> Value {
            let mut body = response.body;
            body["mocked"] = json!(true);
            body
        }
    }

    fn handler(content_base: &std::path::Path) -> DevProxyHandler {
        let mut config = DevProxyConfig::default();
        config.hosts = vec!["dev.m.example.com".to_string()];
        config
            .hosts_map
            .insert("api.internal.com".to_string(), "10.1.2.3".to_string());
        config.mock_pattern = Some(UrlPattern::new(r"api\.m\.example\.com").unwrap());
        config.content_base = content_base.to_path_buf();
        config.server_port = 9100;
        let config = Arc::new(config);

        let hooks = Hooks::default().with_mock(Flag);
        let fetcher = Arc::new(HttpAssetFetcher::new().unwrap());
        let combo = ComboResolver::from_config(&config, fetcher).unwrap();
        DevProxyHandler::new(
            InterceptionGate::new(config.clone(), hooks.clone(), combo),
            RequestOptionRewriter::new(config.clone()),
            ResponsePipeline::new(config.clone(), hooks),
            true,
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_intercepts_only_configured_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let connect = |authority: &str| {
            Request::builder()
                .method(Method::CONNECT)
                .uri(authority)
                .body(Body::empty())
                .unwrap()
        };
        assert!(h.intercepts(&connect("dev.m.example.com:443")));
        assert!(h.intercepts(&connect("api.internal.com:443")));
        assert!(h.intercepts(&connect("api.m.example.com:443")));
        assert!(!h.intercepts(&connect("www.bank.com:443")));
    }

    #[tokio::test]
    async fn test_favicon_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = handler(dir.path());
        match h.on_request(get("https://dev.m.example.com/favicon.ico")).await {
            RequestOrResponse::Response(res) => {
                assert_eq!(res.status(), StatusCode::OK);
                assert_eq!(res.headers()[header::CONTENT_TYPE], "image/x-icon");
            }
            RequestOrResponse::Request(_) => panic!("favicon should be answered locally"),
        }
    }

    #[tokio::test]
    async fn test_local_file_redirects_to_static_server() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let mut h = handler(dir.path());

        let req = Request::builder()
            .uri("https://dev.m.example.com/index.html?x=1")
            .header(header::HOST, "dev.m.example.com")
            .body(Body::empty())
            .unwrap();
        match h.on_request(req).await {
            RequestOrResponse::Request(req) => {
                assert_eq!(req.uri().to_string(), "http://localhost:9100/index.html?x=1");
                assert_eq!(req.headers()[header::HOST], "dev.m.example.com");
                assert_eq!(req.headers()[header::IF_NONE_MATCH], "no-match-for-this");
            }
            RequestOrResponse::Response(_) => panic!("expected forwarded request"),
        }
    }

    #[tokio::test]
    async fn test_host_map_rewrites_uri() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = handler(dir.path());
        match h.on_request(get("http://api.internal.com:8080/v1?a=b")).await {
            RequestOrResponse::Request(req) => {
                assert_eq!(req.uri().to_string(), "http://10.1.2.3:8080/v1?a=b");
            }
            RequestOrResponse::Response(_) => panic!("expected forwarded request"),
        }
    }

    #[tokio::test]
    async fn test_response_mocked_and_headers_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = handler(dir.path());
        let _ = h.on_request(get("https://api.m.example.com/h5/user?callback=cb")).await;

        let res = Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "11")
            .body(Body::from(r#"{"value":1}"#))
            .unwrap();
        let res = h.on_response(res).await;

        assert_eq!(res.headers()[header::STRICT_TRANSPORT_SECURITY], "max-age=0");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(res.headers().get(header::CONTENT_LENGTH).is_none());
        let body = body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(&body[..], br#"cb({"mocked":true,"value":1})"#);
    }

    #[tokio::test]
    async fn test_untracked_response_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = handler(dir.path());
        let res = Response::builder()
            .header(header::CONTENT_LENGTH, "2")
            .body(Body::from("ok"))
            .unwrap();
        let res = h.on_response(res).await;
        assert!(res.headers().get(header::STRICT_TRANSPORT_SECURITY).is_none());
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "2");
    }
}
