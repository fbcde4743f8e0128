//! DevProxy Core Library
//!
//! Interception and content-rewriting pipeline for a local development
//! proxy: HTTPS interception decisions, local short-circuit answers (mocks,
//! favicon, combo assets), outbound target rewriting and response rewriting
//! (API mocks, SSI, script injection, user HTML transforms).

pub mod ca;
pub mod combo;
pub mod filter;
pub mod flow;
pub mod gate;
pub mod handler;
pub mod headers;
pub mod hooks;
pub mod html;
pub mod mock;
pub mod pipeline;
/// Core proxy functionality modules
pub mod proxy;
pub mod reload;
pub mod rewriter;
pub mod static_server;

/// Configuration types and utilities
pub mod config;

/// Error types for proxy operations
pub mod error;

pub use ca::CertificateAuthority;
pub use combo::{AssetFetcher, ComboResolver, HttpAssetFetcher};
pub use config::{DevProxyConfig, UrlPattern};
pub use error::ProxyError;
pub use filter::HostSet;
pub use flow::{InboundRequest, RequestOptions, ResponseEnvelope};
pub use gate::InterceptionGate;
pub use handler::DevProxyHandler;
pub use hooks::{
    ComboMapper, Hooks, HtmlModifier, HtmlModifyContext, MockBeforeData, MockBeforeFunction,
    MockFunction, MockResponse,
};
pub use html::{CommentNode, HtmlDocument};
pub use pipeline::ResponsePipeline;
/// Re-export commonly used types
pub use proxy::ProxyServer;
pub use reload::ReloadingHooks;
pub use rewriter::RequestOptionRewriter;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
