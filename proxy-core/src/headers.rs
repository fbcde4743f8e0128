//! Response header rewriting applied to every proxied response.

use hudsucker::hyper::{
    header::{self, HeaderValue},
    HeaderMap,
};

/// Add permissive CORS headers when `cors_inject` is set and always disable
/// HSTS so development hosts are never pinned to HTTPS.
pub fn rewrite_response_headers(headers: &mut HeaderMap, cors_inject: bool) {
    if cors_inject {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,PUT,POST"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept"),
        );
    }
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=0"),
    );
}
