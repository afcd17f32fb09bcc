//! Markup helpers shared by the HTML filter and extractor.

use std::borrow::Cow;

use ego_tree::NodeRef;
use encoding_rs::{Encoding, UTF_8};
use scraper::{ElementRef, Node, Selector};

use crate::pipeline::{Content, ContentResult, StageError};

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "template", "noscript"];

/// Decodes raw bytes with the declared charset, falling back to UTF-8.
///
/// A byte order mark overrides the declared charset.
#[must_use]
pub fn decode<'a>(bytes: &'a [u8], charset: Option<&str>) -> Cow<'a, str> {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text
}

/// Returns the markup carried by `result` as text.
pub fn markup(result: &ContentResult) -> Cow<'_, str> {
    match &result.content {
        Content::Text(text) => Cow::Borrowed(text.as_str()),
        Content::Bytes(bytes) => decode(bytes, result.encoding.as_deref()),
    }
}

/// Parses a CSS selector, reporting failures against `stage`.
pub fn selector(stage: &str, css: &str) -> Result<Selector, StageError> {
    Selector::parse(css)
        .map_err(|err| StageError::lifecycle(stage, format!("invalid selector `{css}`: {err}")))
}

/// Returns the only element below `scope` matching `selector`, if exactly one does.
pub fn singular<'a>(scope: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    let mut matches = scope.select(selector);
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Visible text below `root`: trimmed text nodes joined by single spaces.
#[must_use]
pub fn visible_text(root: NodeRef<'_, Node>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut stack: Vec<NodeRef<'_, Node>> = root.children().rev().collect();

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Node::Element(element) if HIDDEN_ELEMENTS.contains(&element.name()) => {}
            Node::Element(_) | Node::Document | Node::Fragment => {
                stack.extend(node.children().rev());
            }
            _ => {}
        }
    }

    parts.join(" ")
}
