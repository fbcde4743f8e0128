//! Response rewrite pipeline.
//!
//! Two tracks may fire on a response. The mock track rewrites JSON/JSONP API
//! bodies through the user's [`MockFunction`](crate::hooks::MockFunction).
//! The HTML track decodes the page with its declared charset, resolves
//! server-side includes, injects the in-app bridge script and hands the
//! document to the user's [`HtmlModifier`](crate::hooks::HtmlModifier)
//! before re-encoding. When both would fire the mock track wins.

use encoding_rs::{Encoding, UTF_8};
use hudsucker::hyper::header;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{matches, DevProxyConfig};
use crate::filter::HostSet;
use crate::flow::{InboundRequest, ResponseEnvelope};
use crate::hooks::{Hooks, HtmlModifyContext};
use crate::html::{extract_comments, ssi, HtmlDocument};
use crate::mock::try_mock;
use crate::rewriter::absolute;
use crate::Result;

#[derive(Clone)]
pub struct ResponsePipeline {
    config: Arc<DevProxyConfig>,
    hosts: HostSet,
    hooks: Hooks,
    content_root: PathBuf,
}

impl ResponsePipeline {
    pub fn new(config: Arc<DevProxyConfig>, hooks: Hooks) -> Self {
        let hosts = config.host_set();
        let content_root = absolute(&config.content_base);
        Self {
            config,
            hosts,
            hooks,
            content_root,
        }
    }

    /// Whether the mock track fires for this request.
    pub fn mock_applies(&self, req: &InboundRequest) -> bool {
        self.hooks.mock.is_some() && matches(&self.config.mock_pattern, &req.absolute_url())
    }

    /// Whether the HTML track fires for this request and response content type.
    pub fn html_applies(&self, req: &InboundRequest, content_type: Option<&str>) -> bool {
        let is_html = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false);
        if !is_html {
            return false;
        }
        let proxied = req.host().map(|h| self.hosts.contains(&h)).unwrap_or(false);
        proxied || matches(&self.config.html_intercept_pattern, &req.absolute_url())
    }

    /// Whether the body of this response needs to be buffered and rewritten.
    pub fn applies(&self, req: &InboundRequest, content_type: Option<&str>) -> bool {
        self.mock_applies(req) || self.html_applies(req, content_type)
    }

    /// Run whichever track applies. Responses no track claims pass through.
    pub async fn rewrite(
        &self,
        req: &InboundRequest,
        mut res: ResponseEnvelope,
    ) -> ResponseEnvelope {
        let url = req.absolute_url();

        if self.mock_applies(req) {
            if res.is_redirect() {
                debug!("Redirect from {}, skipping mock", url);
                return res;
            }
            if let Some(mock) = &self.hooks.mock {
                let body = String::from_utf8_lossy(&res.body);
                if let Some(mocked) = try_mock(&url, &res.headers, &body, mock.as_ref()) {
                    res.body = mocked.into();
                }
            }
            return res;
        }

        if self.html_applies(req, res.content_type()) {
            match self.rewrite_html(req, &res).await {
                Ok(body) => res.body = body.into(),
                Err(e) => warn!("HTML rewrite of {} failed, passing through: {}", url, e),
            }
        }
        res
    }

    async fn rewrite_html(&self, req: &InboundRequest, res: &ResponseEnvelope) -> Result<Vec<u8>> {
        let url = req.absolute_url();
        let charset = res.charset();
        let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or_else(|| {
            warn!("Unknown charset {:?} for {}, decoding as utf-8", charset, url);
            UTF_8
        });
        let (text, _) = encoding.decode_without_bom_handling(&res.body);

        let mut document = HtmlDocument::parse(text.into_owned());
        let mut comments = extract_comments(&document)?;

        if comments.iter().any(|c| ssi::include_target(c).is_some()) {
            let file_path = self.file_path(&req.path());
            document = ssi::resolve_includes(document, &comments, &file_path)?;
            comments = extract_comments(&document)?;
        }

        if let Some(script) = &self.config.inject_script {
            let user_agent = req.header(header::USER_AGENT.as_str()).unwrap_or_default();
            if self.config.inject_user_agent.is_match(user_agent) {
                let tag = format!("<script src=\"{}\"></script>", script);
                if document.prepend_to_head(&tag)? {
                    debug!("Injected {} into {}", script, url);
                }
            }
        }

        let ctx = HtmlModifyContext {
            url: &url,
            request_headers: &req.headers,
            response_headers: &res.headers,
            comments: &comments,
        };
        let html = self.hooks.html_modify.modify(ctx, document).await;

        let (bytes, _, _) = encoding.encode(&html);
        Ok(bytes.into_owned())
    }

    /// File under the content root corresponding to a request path.
    fn file_path(&self, path: &str) -> PathBuf {
        let mut relative = path.trim_start_matches('/').to_string();
        if relative.is_empty() || relative.ends_with('/') {
            relative.push_str("index.html");
        }
        self.content_root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlPattern;
    use crate::flow::header_map;
    use crate::hooks::{IdentityMock, MockFunction, MockResponse};
    use serde_json::{json, Value};

    struct SetValue;

    impl MockFunction for SetValue {
        fn mock(&self, _url: &str, response: MockResponse<'_>) -> Value {
            let mut body = response.body;
            body["value"] = json!(2);
            body
        }
    }

    fn config() -> DevProxyConfig {
        let mut config = DevProxyConfig::default();
        config.hosts = vec!["dev.m.example.com".to_string()];
        config.mock_pattern = Some(UrlPattern::new(r"api\.m\.example\.com|/mock/").unwrap());
        config.inject_script = Some("https://cdn.example.com/bridge.js".to_string());
        config
    }

    fn pipeline(config: DevProxyConfig, hooks: Hooks) -> ResponsePipeline {
        ResponsePipeline::new(Arc::new(config), hooks)
    }

    #[tokio::test]
    async fn test_redirect_skips_mock() {
        let p = pipeline(config(), Hooks::default().with_mock(SetValue));
        let req = InboundRequest::get("https://api.m.example.com/h5/login");
        let res = ResponseEnvelope::new(
            302,
            header_map([
                ("location", "https://login.example.com/"),
                ("content-type", "application/json"),
            ]),
            r#"{"value":1}"#,
        );
        let out = p.rewrite(&req, res).await;
        assert_eq!(&out.body[..], br#"{"value":1}"#);
    }

    #[tokio::test]
    async fn test_jsonp_mock() {
        let p = pipeline(config(), Hooks::default().with_mock(SetValue));
        let req = InboundRequest::get("https://api.m.example.com/h5/data");
        let res = ResponseEnvelope::new(
            200,
            header_map([("content-type", "application/json")]),
            r#"foo({"value":1})"#,
        );
        let out = p.rewrite(&req, res).await;
        assert_eq!(&out.body[..], br#"foo({"value":2})"#);
    }

    #[tokio::test]
    async fn test_non_json_mock_body_is_byte_identical() {
        let p = pipeline(config(), Hooks::default().with_mock(IdentityMock));
        let req = InboundRequest::get("https://api.m.example.com/logo.png");
        let png: Vec<u8> = vec![137, 80, 78, 71, 13, 10, 26, 10, 255, 254, 0, 128];
        let headers = header_map([("content-type", "image/png")]);
        let res = ResponseEnvelope::new(200, headers, png.clone());
        assert!(p.mock_applies(&req));

        let out = p.rewrite(&req, res).await;
        assert_eq!(out.body.to_vec(), png);
    }

    #[tokio::test]
    async fn test_mock_track_supersedes_html_track() {
        let p = pipeline(config(), Hooks::default().with_mock(SetValue));
        let req = InboundRequest::get("https://dev.m.example.com/mock/page.html")
            .with_header("user-agent", "WindVane/8.0");
        let page = "<html><head></head><body></body></html>";
        let res = ResponseEnvelope::new(200, header_map([("content-type", "text/html")]), page);
        assert!(p.html_applies(&req, res.content_type()));

        let out = p.rewrite(&req, res).await;
        assert_eq!(&out.body[..], page.as_bytes());
    }

    #[tokio::test]
    async fn test_script_injected_for_in_app_browser() {
        let p = pipeline(config(), Hooks::default());
        let page = "<html><head><title>t</title></head><body></body></html>";
        let res = || {
            ResponseEnvelope::new(
                200,
                header_map([("content-type", "text/html; charset=utf-8")]),
                page,
            )
        };

        let app = InboundRequest::get("https://dev.m.example.com/index.html")
            .with_header("user-agent", "Mozilla/5.0 AliApp(TB/9.0) WindVane/8.5.0");
        let out = p.rewrite(&app, res()).await;
        assert_eq!(
            std::str::from_utf8(&out.body).unwrap(),
            "<html><head><script src=\"https://cdn.example.com/bridge.js\"></script><title>t</title></head><body></body></html>"
        );

        let desktop = InboundRequest::get("https://dev.m.example.com/index.html")
            .with_header("user-agent", "Mozilla/5.0 Chrome/120");
        let out = p.rewrite(&desktop, res()).await;
        assert_eq!(&out.body[..], page.as_bytes());
    }

    #[tokio::test]
    async fn test_gbk_page_round_trips() {
        let p = pipeline(config(), Hooks::default());
        let page = "<html><head><meta charset=\"gbk\"></head><body><p>中文页面 &amp; 测试</p>\n</body></html>";
        let (encoded, _, _) = encoding_rs::GBK.encode(page);
        let original = encoded.into_owned();

        let req = InboundRequest::get("https://dev.m.example.com/gbk.html");
        let res = ResponseEnvelope::new(
            200,
            header_map([("content-type", "text/html;charset=GBK")]),
            original.clone(),
        );
        let out = p.rewrite(&req, res).await;
        assert_eq!(out.body.to_vec(), original);
    }

    #[tokio::test]
    async fn test_unclaimed_responses_pass_through() {
        let p = pipeline(config(), Hooks::default().with_mock(SetValue));
        let req = InboundRequest::get("https://other.example.com/app.js");
        let res =
            ResponseEnvelope::new(200, header_map([("content-type", "text/html")]), "<p>x</p>");
        assert!(!p.applies(&req, res.content_type()));
        let out = p.rewrite(&req, res).await;
        assert_eq!(&out.body[..], b"<p>x</p>");
    }

    #[tokio::test]
    async fn test_ssi_resolved_against_content_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shop")).unwrap();
        std::fs::write(dir.path().join("shop/footer.html"), "<footer>f</footer>").unwrap();

        let mut config = config();
        config.content_base = dir.path().to_path_buf();
        let p = pipeline(config, Hooks::default());

        let req = InboundRequest::get("https://dev.m.example.com/shop/");
        let res = ResponseEnvelope::new(
            200,
            header_map([("content-type", "text/html")]),
            "<body><!--#include virtual=\"footer.html\"--></body>",
        );
        let out = p.rewrite(&req, res).await;
        assert_eq!(&out.body[..], b"<body><footer>f</footer></body>");
    }

    #[test]
    fn test_html_intercept_pattern() {
        let mut config = config();
        config.html_intercept_pattern =
            Some(UrlPattern::new(r"^https://h5\.example\.com/").unwrap());
        let p = pipeline(config, Hooks::default());
        let req = InboundRequest::get("https://h5.example.com/act/index.html");
        assert!(p.html_applies(&req, Some("text/html; charset=utf-8")));
        assert!(!p.html_applies(&req, Some("application/javascript")));
        assert!(!p.html_applies(&req, None));
    }
}
