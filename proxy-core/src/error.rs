//! Error types for proxy operations

use thiserror::Error;

/// Main error type for proxy operations
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Certificate-related errors
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTML parsing or rewriting errors
    #[error("HTML rewrite error: {0}")]
    Html(String),

    /// Combo mapping returned a different number of local paths than remote parts
    #[error("Combo mapping mismatch for {url}: {remote} remote parts but {local} local paths")]
    ComboMismatch {
        url: String,
        remote: usize,
        local: usize,
    },

    /// Fetch attempt exceeded its time budget
    #[error("Timed out fetching {0}")]
    Timeout(String),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(err.url().map(|u| u.to_string()).unwrap_or_default())
        } else {
            ProxyError::Network(err.to_string())
        }
    }
}

impl From<lol_html::errors::RewritingError> for ProxyError {
    fn from(err: lol_html::errors::RewritingError) -> Self {
        ProxyError::Html(err.to_string())
    }
}
