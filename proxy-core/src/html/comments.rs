use lol_html::{doc_comments, Settings};

use super::{run_rewriter, HtmlDocument};
use crate::Result;

/// A comment in an [`HtmlDocument`].
///
/// `index` is the comment's position in document order and refers back into
/// the document it was extracted from; the node owns only a copy of the raw
/// comment text (without the `<!--`/`-->` delimiters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub index: usize,
    pub text: String,
}

impl CommentNode {
    /// The comment as it appears in the source.
    pub fn markup(&self) -> String {
        format!("<!--{}-->", self.text)
    }
}

/// Collect every comment node of the document, in document order.
pub fn extract_comments(document: &HtmlDocument) -> Result<Vec<CommentNode>> {
    let mut nodes = Vec::new();
    run_rewriter(
        document.html(),
        Settings {
            document_content_handlers: vec![doc_comments!(|c| {
                let index = nodes.len();
                nodes.push(CommentNode {
                    index,
                    text: c.text(),
                });
                Ok(())
            })],
            ..Settings::default()
        },
    )?;
    Ok(nodes)
}
