//! API response mocking for JSON and JSONP bodies.

use hudsucker::hyper::{header, HeaderMap};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{error, info};
use url::Url;

use crate::hooks::{MockFunction, MockResponse};

fn jsonp_envelope() -> &'static Regex {
    static JSONP: OnceLock<Regex> = OnceLock::new();
    JSONP.get_or_init(|| {
        Regex::new(r"(?s)^\s*([\w$.]+)\s*\((.*)\)\s*;?\s*$").expect("static JSONP pattern")
    })
}

/// `callback` query parameter of a URL, if any.
fn callback_param(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "callback")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn is_json_response(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Run `mock` over an API response body.
///
/// Only `application/json` responses are touched. A plain JSON body is
/// re-padded with the `callback` query parameter when present; a JSONP body
/// keeps its own callback name. Bodies that are neither pass through
/// unchanged.
pub fn invoke_mock(url: &str, headers: &HeaderMap, body: &str, mock: &dyn MockFunction) -> String {
    try_mock(url, headers, body, mock).unwrap_or_else(|| body.to_string())
}

/// Like [`invoke_mock`], but `None` when the body is left alone.
pub fn try_mock(
    url: &str,
    headers: &HeaderMap,
    body: &str,
    mock: &dyn MockFunction,
) -> Option<String> {
    if !is_json_response(headers) {
        return None;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(parsed) => {
            let mocked = mock.mock(url, MockResponse { headers, body: parsed });
            let json = mocked.to_string();
            info!("[Interface Mock] Interface Response Mocked for {}", url);
            Some(match callback_param(url) {
                Some(callback) => format!("{}({})", callback, json),
                None => json,
            })
        }
        Err(_) => {
            let Some(captures) = jsonp_envelope().captures(body) else {
                error!(">> [Invalid JSONP Response!]: {}", body);
                return None;
            };
            let callback = &captures[1];
            match serde_json::from_str::<Value>(captures[2].trim()) {
                Ok(parsed) => {
                    let mocked = mock.mock(url, MockResponse { headers, body: parsed });
                    info!("[Interface Mock] Interface Response Mocked for {}", url);
                    Some(format!("{}({})", callback, mocked))
                }
                Err(e) => {
                    error!(">> [Invalid JSON in JSONP Response!]: {} ({})", body, e);
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::header_map;
    use crate::hooks::IdentityMock;
    use serde_json::json;

    struct SetValue(i64);

    impl MockFunction for SetValue {
        fn mock(&self, _url: &str, response: MockResponse<'_>) -> Value {
            let mut body = response.body;
            body["value"] = json!(self.0);
            body
        }
    }

    fn json_headers() -> HeaderMap {
        header_map([("content-type", "application/json;charset=UTF-8")])
    }

    #[test]
    fn test_json_with_callback_query() {
        let out = invoke_mock(
            "https://api.example.com/h5/x?callback=cb",
            &json_headers(),
            r#"{"value":1}"#,
            &SetValue(2),
        );
        assert_eq!(out, r#"cb({"value":2})"#);
    }

    #[test]
    fn test_plain_json_without_callback() {
        let out = invoke_mock(
            "https://api.example.com/h5/x",
            &json_headers(),
            r#"{"value":1,"other":"a"}"#,
            &SetValue(5),
        );
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"value": 5, "other": "a"}));
    }

    #[test]
    fn test_jsonp_envelope_keeps_callback_name() {
        let out = invoke_mock(
            "https://api.example.com/h5/x",
            &json_headers(),
            r#"foo({"value":1})"#,
            &SetValue(2),
        );
        assert_eq!(out, r#"foo({"value":2})"#);

        let out = invoke_mock(
            "https://api.example.com/h5/x",
            &json_headers(),
            "  jsonp_12({\n\"value\": 1\n});\n",
            &SetValue(3),
        );
        assert_eq!(out, r#"jsonp_12({"value":3})"#);
    }

    #[test]
    fn test_malformed_bodies_pass_through() {
        let headers = json_headers();
        let not_jsonp = "<html>oops</html>";
        assert_eq!(
            invoke_mock("https://a.com/x", &headers, not_jsonp, &SetValue(2)),
            not_jsonp
        );

        let bad_inner = "cb({value:1})";
        assert_eq!(
            invoke_mock("https://a.com/x", &headers, bad_inner, &SetValue(2)),
            bad_inner
        );
    }

    #[test]
    fn test_non_json_content_type_untouched() {
        let headers = header_map([("content-type", "text/javascript")]);
        let body = r#"{"value":1}"#;
        assert_eq!(invoke_mock("https://a.com/x", &headers, body, &SetValue(2)), body);
        assert_eq!(invoke_mock("https://a.com/x", &HeaderMap::new(), body, &SetValue(2)), body);
    }

    #[test]
    fn test_try_mock_reports_untouched_bodies() {
        let png = header_map([("content-type", "image/png")]);
        assert!(try_mock("https://a.com/x", &png, "\u{fffd}PNG", &IdentityMock).is_none());
        assert!(try_mock("https://a.com/x", &json_headers(), "cb({x})", &IdentityMock).is_none());
        assert_eq!(
            try_mock("https://a.com/x", &json_headers(), "[1]", &IdentityMock).as_deref(),
            Some("[1]")
        );
    }

    #[test]
    fn test_identity_mock_adds_padding() {
        let out = invoke_mock(
            "https://a.com/x?callback=jsonp3",
            &json_headers(),
            r#"{"ok": true}"#,
            &IdentityMock,
        );
        assert_eq!(out, r#"jsonp3({"ok":true})"#);
    }
}
