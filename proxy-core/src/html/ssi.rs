//! Server-side include resolution.
//!
//! Handles `<!--#include virtual="path"-->` directives by inlining the
//! referenced file. The substitution is a string replace on the page source
//! because an include region need not be a well-formed DOM subtree.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::{CommentNode, HtmlDocument};
use crate::Result;

fn include_directive() -> &'static Regex {
    static SSI: OnceLock<Regex> = OnceLock::new();
    SSI.get_or_init(|| {
        Regex::new(r#"#include\s*virtual=['"]([^'"]*)['"]"#).expect("static SSI pattern")
    })
}

/// Path named by an include directive, if the comment is one.
pub fn include_target(comment: &CommentNode) -> Option<&str> {
    include_directive()
        .captures(&comment.text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Resolve every include directive among `comments`.
///
/// `file_path` is the file-system path of the requested page; include paths
/// resolve against its directory. Missing targets have their comment text
/// replaced by an `ERROR:` marker. If any include was inlined the mutated
/// source is reparsed and returned, otherwise the input document comes back
/// with only marker edits applied.
pub fn resolve_includes(
    mut document: HtmlDocument,
    comments: &[CommentNode],
    file_path: &Path,
) -> Result<HtmlDocument> {
    let directives: Vec<(&CommentNode, &str)> = comments
        .iter()
        .filter_map(|c| include_target(c).map(|t| (c, t)))
        .collect();
    if directives.is_empty() {
        return Ok(document);
    }

    let page_dir = file_path.parent().unwrap_or_else(|| Path::new("/"));
    let mut inlined = Vec::new();

    for (node, target) in directives {
        let resolved = normalize(&page_dir.join(target));
        if resolved.is_file() {
            inlined.push((node, resolved));
        } else {
            warn!("SSI include {} not found", resolved.display());
            let marker = format!("ERROR: SSI PATH {} not exist.", resolved.display());
            document.set_comment_text(node, &marker)?;
        }
    }

    if inlined.is_empty() {
        return Ok(document);
    }

    let mut source = document.into_html();
    for (node, resolved) in inlined {
        let raw = std::fs::read(&resolved)?;
        let mut fragment = HtmlDocument::parse(String::from_utf8_lossy(&raw).into_owned());
        let fragment_dir = resolved.parent().unwrap_or(page_dir);
        rebase_relative_refs(&mut fragment, fragment_dir, page_dir)?;
        debug!("SSI include {} inlined", resolved.display());
        source = source.replacen(&node.markup(), fragment.html(), 1);
    }

    Ok(HtmlDocument::parse(source))
}

/// Make relative script/stylesheet references of an included fragment
/// relative to the including page instead of the fragment's own directory.
fn rebase_relative_refs(
    fragment: &mut HtmlDocument,
    fragment_dir: &Path,
    page_dir: &Path,
) -> Result<()> {
    let rebase = |value: &str| -> Option<String> {
        if value.starts_with("./") || value.starts_with("../") {
            let absolute = normalize(&fragment_dir.join(value));
            Some(relative_path(page_dir, &absolute))
        } else {
            None
        }
    };
    fragment.rewrite_attribute("script[src]", "src", rebase)?;
    fragment.rewrite_attribute("link[href]", "href", rebase)?;
    Ok(())
}

/// Lexically resolve `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `/`-joined path leading from directory `from` to `to`.
pub(crate) fn relative_path(from: &Path, to: &Path) -> String {
    let from = normalize(from);
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}
