//! User-supplied transforms plugged into the pipeline.

use async_trait::async_trait;
use hudsucker::hyper::HeaderMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::html::{CommentNode, HtmlDocument};

/// Response handed to a [`MockFunction`].
pub struct MockResponse<'a> {
    pub headers: &'a HeaderMap,
    pub body: Value,
}

/// Rewrites a parsed JSON/JSONP API response body.
pub trait MockFunction: Send + Sync {
    fn mock(&self, url: &str, response: MockResponse<'_>) -> Value;
}

/// Returns the body unchanged.
pub struct IdentityMock;

impl MockFunction for IdentityMock {
    fn mock(&self, _url: &str, response: MockResponse<'_>) -> Value {
        response.body
    }
}

/// Data returned by a [`MockBeforeFunction`] for a request answered without
/// contacting the origin.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBeforeData {
    /// Body only; default CORS and JSON headers are added.
    Body(Value),
    /// Complete response headers and body text.
    Response {
        headers: BTreeMap<String, String>,
        body: String,
    },
}

/// Decides whether an API request is answered locally with mock data.
pub trait MockBeforeFunction: Send + Sync {
    fn mock_before(&self, url: &str) -> Option<MockBeforeData>;
}

/// Everything an [`HtmlModifier`] may inspect besides the document itself.
pub struct HtmlModifyContext<'a> {
    pub url: &'a str,
    pub request_headers: &'a HeaderMap,
    pub response_headers: &'a HeaderMap,
    pub comments: &'a [CommentNode],
}

/// Final page transform; the returned string becomes the response body.
#[async_trait]
pub trait HtmlModifier: Send + Sync {
    async fn modify(&self, ctx: HtmlModifyContext<'_>, document: HtmlDocument) -> String;
}

/// Serializes the document untouched.
pub struct IdentityHtml;

#[async_trait]
impl HtmlModifier for IdentityHtml {
    async fn modify(&self, _ctx: HtmlModifyContext<'_>, document: HtmlDocument) -> String {
        document.into_html()
    }
}

/// Maps the remote constituents of a combo URL to local static-server paths.
///
/// The returned list must be index-aligned with `parts`.
pub trait ComboMapper: Send + Sync {
    fn map_local(&self, combo_url: &str, parts: &[String]) -> Vec<String>;
}

impl<F> ComboMapper for F
where
    F: Fn(&str, &[String]) -> Vec<String> + Send + Sync,
{
    fn map_local(&self, combo_url: &str, parts: &[String]) -> Vec<String> {
        self(combo_url, parts)
    }
}

/// The set of hooks a pipeline instance runs with.
#[derive(Clone)]
pub struct Hooks {
    pub mock: Option<Arc<dyn MockFunction>>,
    pub mock_before: Option<Arc<dyn MockBeforeFunction>>,
    pub html_modify: Arc<dyn HtmlModifier>,
    pub combo_map: Option<Arc<dyn ComboMapper>>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            mock: None,
            mock_before: None,
            html_modify: Arc::new(IdentityHtml),
            combo_map: None,
        }
    }
}

impl Hooks {
    /// Route every hook through one implementation.
    pub fn from_all<T>(hooks: Arc<T>) -> Self
    where
        T: MockFunction + MockBeforeFunction + HtmlModifier + ComboMapper + 'static,
    {
        Self {
            mock: Some(hooks.clone()),
            mock_before: Some(hooks.clone()),
            html_modify: hooks.clone(),
            combo_map: Some(hooks),
        }
    }

    pub fn with_mock(mut self, mock: impl MockFunction + 'static) -> Self {
        self.mock = Some(Arc::new(mock));
        self
    }

    pub fn with_mock_before(mut self, mock_before: impl MockBeforeFunction + 'static) -> Self {
        self.mock_before = Some(Arc::new(mock_before));
        self
    }

    pub fn with_html_modify(mut self, modifier: impl HtmlModifier + 'static) -> Self {
        self.html_modify = Arc::new(modifier);
        self
    }

    pub fn with_combo_map(mut self, mapper: impl ComboMapper + 'static) -> Self {
        self.combo_map = Some(Arc::new(mapper));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("mock", &self.mock.is_some())
            .field("mock_before", &self.mock_before.is_some())
            .field("combo_map", &self.combo_map.is_some())
            .finish()
    }
}
