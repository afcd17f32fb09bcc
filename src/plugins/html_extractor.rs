//! Plain text and page metadata from HTML.

use std::collections::BTreeMap;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::html;
use crate::pipeline::{
    Content, ContentResult, ContentTypes, Extractor, HTML_FRAGMENT, StageError, TEXT_HTML,
    TEXT_PLAIN, content_types,
};
use crate::plugin::{Capability, PluginContext, PluginError, PluginFactory};

const NAME: &str = "HtmlExtractor";

/// `<meta name=...>` entries copied into the result metadata.
const ALLOWED_META: [&str; 2] = ["author", "description"];

#[derive(Debug)]
struct Selectors {
    meta: Selector,
    title: Selector,
    icon: Selector,
}

/// Extracts the visible text of the current markup.
///
/// Metadata (author, description, title, favicon) is read from the oldest
/// markup in the provenance chain, since filters strip the document head.
#[derive(Debug, Default)]
pub struct HtmlExtractor {
    selectors: Option<Selectors>,
}

impl HtmlExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn page_meta(selectors: &Selectors, markup: &str, url: &Url) -> BTreeMap<String, String> {
        let doc = Html::parse_document(markup);
        let mut meta = BTreeMap::new();

        for element in doc.root_element().select(&selectors.meta) {
            let attrs = element.value();
            if let (Some(name), Some(content)) = (attrs.attr("name"), attrs.attr("content"))
                && ALLOWED_META.contains(&name)
            {
                meta.insert(name.to_string(), content.to_string());
            }
        }

        if let Some(title) = doc.root_element().select(&selectors.title).next() {
            meta.insert(
                "title".to_string(),
                title.text().collect::<String>().trim().to_string(),
            );
        }

        match doc
            .root_element()
            .select(&selectors.icon)
            .find_map(|link| link.value().attr("href"))
        {
            Some(href) => match url.join(href) {
                Ok(favicon) => {
                    meta.insert("favicon".to_string(), favicon.to_string());
                }
                Err(err) => debug!(href, error = %err, "unusable favicon href"),
            },
            None => debug!("no favicon link"),
        }

        meta
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn accept(&self) -> ContentTypes {
        content_types([TEXT_HTML, HTML_FRAGMENT])
    }

    fn content_types(&self) -> ContentTypes {
        content_types([TEXT_PLAIN])
    }

    async fn enter(&mut self) -> Result<(), StageError> {
        self.selectors = Some(Selectors {
            meta: html::selector(NAME, "meta[name][content]")?,
            title: html::selector(NAME, "title")?,
            icon: html::selector(NAME, "link[rel~=icon][href]")?,
        });
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        self.selectors = None;
        Ok(())
    }

    async fn extract(&mut self, input: ContentResult) -> Result<ContentResult, StageError> {
        if !self.accept().contains(&input.content_type) {
            return Err(StageError::unsupported(NAME, &input.content_type));
        }
        let selectors = self.selectors.as_ref().ok_or_else(|| StageError::not_entered(NAME))?;

        let text = {
            let doc = Html::parse_document(&html::markup(&input));
            html::visible_text(*doc.root_element())
        };
        let page_meta = input
            .oldest_of_type(&self.accept())
            .map(|oldest| Self::page_meta(selectors, &html::markup(oldest), &input.url))
            .unwrap_or_default();

        let mut extracted = input.derive(Content::Text(text), TEXT_PLAIN);
        extracted.encoding = None;
        extracted.meta.extend(page_meta);
        Ok(extracted)
    }
}

/// Factory for [`HtmlExtractor`].
#[derive(Debug, Default)]
pub struct HtmlExtractorPlugin;

impl PluginFactory for HtmlExtractorPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn module(&self) -> &str {
        module_path!()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Extractor]
    }

    fn accepts(&self) -> ContentTypes {
        content_types([TEXT_HTML, HTML_FRAGMENT])
    }

    fn create_extractor(&self, _ctx: &PluginContext) -> Result<Box<dyn Extractor>, PluginError> {
        Ok(Box::new(HtmlExtractor::new()))
    }
}
