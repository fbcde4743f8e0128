//! Hooks defined declaratively in the configuration file, re-read from disk
//! on every invocation so edits apply without restarting the proxy.
//!
//! ```json
//! {
//!   "hooks": {
//!     "mock": [{ "url": "mtop\\.user", "merge": { "data": { "vip": true } } }],
//!     "mock_before": [{ "url": "mtop\\.cart", "body": { "items": [] } }],
//!     "combo_map": [{ "pattern": "^https://g\\.cdn\\.com/mall/\\d+\\.\\d+\\.\\d+/", "replace": "/build/" }],
//!     "html": [{ "url": "index\\.html", "find": "__ENV__", "replace": "daily" }]
//!   }
//! }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{debug, warn};
use url::Url;

use crate::config::UrlPattern;
use crate::hooks::{
    ComboMapper, HtmlModifier, HtmlModifyContext, MockBeforeData, MockBeforeFunction, MockFunction,
    MockResponse,
};
use crate::html::HtmlDocument;

#[derive(Debug, Clone, Deserialize)]
pub struct MockRule {
    pub url: UrlPattern,
    /// Deep-merged into the parsed body
    #[serde(default)]
    pub merge: Option<Value>,
    /// Replaces the parsed body; applied before `merge`
    #[serde(default)]
    pub replace: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockBeforeRule {
    pub url: UrlPattern,
    pub body: Value,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComboMapRule {
    pub pattern: UrlPattern,
    pub replace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HtmlRule {
    pub url: UrlPattern,
    pub find: String,
    pub replace: String,
}

/// The `hooks` section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookRules {
    pub mock: Vec<MockRule>,
    pub mock_before: Vec<MockBeforeRule>,
    pub combo_map: Vec<ComboMapRule>,
    pub html: Vec<HtmlRule>,
}

#[derive(Debug, Default, Deserialize)]
struct HooksFile {
    #[serde(default)]
    hooks: HookRules,
}

/// Hook implementation backed by the configuration file on disk.
#[derive(Debug, Clone)]
pub struct ReloadingHooks {
    path: PathBuf,
}

impl ReloadingHooks {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current rules. A missing or unparsable file yields no rules.
    ///
    /// On a multi-threaded runtime the read runs under
    /// [`block_in_place`](tokio::task::block_in_place) so the worker's other
    /// tasks move elsewhere while the file is read.
    pub fn rules(&self) -> HookRules {
        let read = || std::fs::read_to_string(&self.path);
        let raw = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(read)
            }
            _ => read(),
        };
        self.parse(raw)
    }

    /// Current rules, read without blocking the runtime.
    pub async fn load_rules(&self) -> HookRules {
        self.parse(fs::read_to_string(&self.path).await)
    }

    fn parse(&self, raw: io::Result<String>) -> HookRules {
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Hooks file {} unreadable: {}", self.path.display(), e);
                return HookRules::default();
            }
        };
        match serde_json::from_str::<HooksFile>(&raw) {
            Ok(file) => file.hooks,
            Err(e) => {
                warn!("Hooks file {} invalid: {}", self.path.display(), e);
                HookRules::default()
            }
        }
    }
}

impl MockFunction for ReloadingHooks {
    fn mock(&self, url: &str, response: MockResponse<'_>) -> Value {
        let mut body = response.body;
        for rule in self.rules().mock.into_iter().filter(|r| r.url.is_match(url)) {
            debug!("mock rule {} applies to {}", rule.url.as_str(), url);
            if let Some(replacement) = rule.replace {
                body = replacement;
            }
            if let Some(patch) = rule.merge {
                merge(&mut body, patch);
            }
        }
        body
    }
}

impl MockBeforeFunction for ReloadingHooks {
    fn mock_before(&self, url: &str) -> Option<MockBeforeData> {
        let rule = self
            .rules()
            .mock_before
            .into_iter()
            .find(|r| r.url.is_match(url))?;
        Some(match rule.headers {
            Some(headers) => MockBeforeData::Response {
                headers,
                body: match rule.body {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            },
            None => MockBeforeData::Body(rule.body),
        })
    }
}

impl ComboMapper for ReloadingHooks {
    fn map_local(&self, _combo_url: &str, parts: &[String]) -> Vec<String> {
        let rules = self.rules().combo_map;
        parts
            .iter()
            .map(|part| {
                match rules.iter().find(|r| r.pattern.is_match(part)) {
                    Some(rule) => rule
                        .pattern
                        .regex()
                        .replace(part, rule.replace.as_str())
                        .into_owned(),
                    None => Url::parse(part)
                        .map(|u| u.path().to_string())
                        .unwrap_or_else(|_| part.clone()),
                }
            })
            .collect()
    }
}

#[async_trait]
impl HtmlModifier for ReloadingHooks {
    async fn modify(&self, ctx: HtmlModifyContext<'_>, document: HtmlDocument) -> String {
        let mut html = document.into_html();
        let rules = self.load_rules().await.html;
        for rule in rules.iter().filter(|r| r.url.is_match(ctx.url)) {
            if !rule.find.is_empty() {
                html = html.replace(&rule.find, &rule.replace);
            }
        }
        html
    }
}

/// Recursively merge `patch` into `target`; non-object values overwrite.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}
