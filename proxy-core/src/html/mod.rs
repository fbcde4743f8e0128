//! HTML document handling for page rewriting.
//!
//! The document is kept as source text. Tree-level edits run as streaming
//! `lol_html` passes that re-serialize only the nodes they touch, so every
//! untouched byte of the page survives unchanged. Text-level edits (SSI)
//! operate on the source string directly.

mod comments;
pub mod ssi;

pub use comments::{extract_comments, CommentNode};

use lol_html::{doc_comments, element, html_content::ContentType, HtmlRewriter, Settings};
use tracing::debug;

use crate::error::ProxyError;
use crate::Result;

/// A parsed HTML page (loose mode, entities undecoded, whitespace preserved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    source: String,
}

impl HtmlDocument {
    pub fn parse(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Serialized markup.
    pub fn html(&self) -> &str {
        &self.source
    }

    pub fn into_html(self) -> String {
        self.source
    }

    /// Insert markup as the first child of `<head>`.
    ///
    /// Returns whether a `<head>` element was found.
    pub fn prepend_to_head(&mut self, markup: &str) -> Result<bool> {
        let mut found = false;
        let rewritten = run_rewriter(
            &self.source,
            Settings {
                element_content_handlers: vec![element!("head", |el| {
                    if !found {
                        el.prepend(markup, ContentType::Html);
                        found = true;
                    }
                    Ok(())
                })],
                ..Settings::default()
            },
        )?;
        if found {
            self.source = rewritten;
        } else {
            debug!("No <head> element, skipping injection");
        }
        Ok(found)
    }

    /// Replace the text of the comment at `node.index` in document order.
    pub fn set_comment_text(&mut self, node: &CommentNode, text: &str) -> Result<()> {
        let mut seen = 0usize;
        let target = node.index;
        self.source = run_rewriter(
            &self.source,
            Settings {
                document_content_handlers: vec![doc_comments!(|c| {
                    if seen == target {
                        c.set_text(text)?;
                    }
                    seen += 1;
                    Ok(())
                })],
                ..Settings::default()
            },
        )?;
        Ok(())
    }

    /// Rewrite `attr` on every element matching `selector`.
    ///
    /// `rewrite` returns the new value, or `None` to leave the attribute alone.
    pub fn rewrite_attribute<F>(
        &mut self,
        selector: &str,
        attr: &str,
        mut rewrite: F,
    ) -> Result<usize>
    where
        F: FnMut(&str) -> Option<String>,
    {
        selector
            .parse::<lol_html::Selector>()
            .map_err(|e| ProxyError::Html(format!("Invalid selector {:?}: {}", selector, e)))?;

        let mut changed = 0usize;
        self.source = run_rewriter(
            &self.source,
            Settings {
                element_content_handlers: vec![element!(selector, |el| {
                    if let Some(value) = el.get_attribute(attr) {
                        if let Some(new_value) = rewrite(&value) {
                            el.set_attribute(attr, &new_value)?;
                            changed += 1;
                        }
                    }
                    Ok(())
                })],
                ..Settings::default()
            },
        )?;
        Ok(changed)
    }
}

/// Stream `source` through a rewriter built from `settings`.
pub(crate) fn run_rewriter(source: &str, settings: Settings<'_, '_>) -> Result<String> {
    let mut output = Vec::with_capacity(source.len());
    let mut rewriter = HtmlRewriter::new(settings, |c: &[u8]| output.extend_from_slice(c));
    rewriter.write(source.as_bytes())?;
    rewriter.end()?;
    String::from_utf8(output).map_err(|e| ProxyError::Html(e.to_string()))
}
