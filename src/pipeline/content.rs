//! The value that flows between pipeline stages.

use std::collections::{BTreeMap, BTreeSet};

use url::Url;

/// Set of MIME-like content type tags.
pub type ContentTypes = BTreeSet<String>;

/// Raw HTML as fetched.
pub const TEXT_HTML: &str = "text/html";
/// Cleaned HTML subtree produced by content filters.
pub const HTML_FRAGMENT: &str = "application/x-html-fragment";
/// Plain extracted text.
pub const TEXT_PLAIN: &str = "text/plain";

/// Builds a [`ContentTypes`] set from string literals.
#[must_use]
pub fn content_types<const N: usize>(types: [&str; N]) -> ContentTypes {
    types.into_iter().map(str::to_string).collect()
}

/// Payload of a [`ContentResult`]; its shape is dictated by `content_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Vec<u8>),
    Text(String),
}

impl Content {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of a pipeline stage.
///
/// Every stage after the downloader consumes its input by value and keeps it
/// as `previous`, so a result owns its whole provenance chain back to the
/// downloaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResult {
    /// Final URL after redirects.
    pub url: Url,
    /// URL originally requested.
    pub request_url: Url,
    pub content: Content,
    pub content_type: String,
    pub encoding: Option<String>,
    /// Metadata accumulated by stages; later stages overwrite earlier keys.
    pub meta: BTreeMap<String, String>,
    pub previous: Option<Box<ContentResult>>,
}

impl ContentResult {
    /// Creates the first link of a chain, as returned by a downloader.
    #[must_use]
    pub fn downloaded(
        url: Url,
        request_url: Url,
        content: Content,
        content_type: impl Into<String>,
        encoding: Option<String>,
    ) -> Self {
        Self {
            url,
            request_url,
            content,
            content_type: content_type.into(),
            encoding,
            meta: BTreeMap::new(),
            previous: None,
        }
    }

    /// Wraps `self` as the provenance of a new result with `content`.
    ///
    /// URLs, encoding and metadata carry over; the new result links back to
    /// `self` unchanged.
    #[must_use]
    pub fn derive(self, content: Content, content_type: impl Into<String>) -> Self {
        Self {
            url: self.url.clone(),
            request_url: self.request_url.clone(),
            content,
            content_type: content_type.into(),
            encoding: self.encoding.clone(),
            meta: self.meta.clone(),
            previous: Some(Box::new(self)),
        }
    }

    /// Iterates from `self` back to the downloaded content.
    pub fn provenance(&self) -> impl Iterator<Item = &ContentResult> {
        std::iter::successors(Some(self), |result| result.previous.as_deref())
    }

    /// Returns the oldest result in the chain.
    #[must_use]
    pub fn origin(&self) -> &ContentResult {
        let mut current = self;
        while let Some(previous) = current.previous.as_deref() {
            current = previous;
        }
        current
    }

    /// Returns the oldest result in the chain with `content_type`.
    #[must_use]
    pub fn oldest_of_type(&self, content_types: &ContentTypes) -> Option<&ContentResult> {
        self.provenance()
            .filter(|result| content_types.contains(&result.content_type))
            .last()
    }
}
