//! Strips page chrome and scopes a page to its main content.

use async_trait::async_trait;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::html;
use crate::pipeline::{
    Content, ContentResult, ContentTypes, Filter, HTML_FRAGMENT, StageError, TEXT_HTML,
    content_types,
};
use crate::plugin::{Capability, PluginContext, PluginError, PluginFactory};

const NAME: &str = "HtmlContentFinder";

/// Elements removed before scoping.
const CHROME: &str = "a[role=button], form, input, nav, .noprint, header, script, style";

#[derive(Debug)]
struct Selectors {
    chrome: Selector,
    main: Selector,
    article: Selector,
}

/// Removes navigation, forms, scripts and comments, then narrows the page to
/// a single `<main>`, `<article>` or `id="content"` element when one exists.
///
/// Pages whose remaining fragment holds no visible text are dropped.
#[derive(Debug, Default)]
pub struct HtmlContentFinder {
    selectors: Option<Selectors>,
}

impl HtmlContentFinder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clean(selectors: &Selectors, markup: &str) -> Option<String> {
        let mut doc = Html::parse_document(markup);

        let mut doomed: Vec<NodeId> = doc
            .tree
            .nodes()
            .filter(|node| node.value().is_comment())
            .map(|node| node.id())
            .collect();
        doomed.extend(doc.root_element().select(&selectors.chrome).map(|element| element.id()));
        for id in doomed {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }

        let mut scope = doc.root_element();
        for (tag, selector) in [("main", &selectors.main), ("article", &selectors.article)] {
            if let Some(found) = html::singular(scope, selector) {
                debug!(tag, "scoping to singular element");
                scope = found;
            }
        }
        if let Some(found) = content_element(scope) {
            debug!("scoping to id=content element");
            scope = found;
        }

        if html::visible_text(*scope).is_empty() {
            return None;
        }
        Some(scope.html())
    }
}

/// The only element at or below `scope` whose id is `content`, ignoring case.
fn content_element(scope: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut matches = scope.descendants().filter_map(ElementRef::wrap).filter(|element| {
        element
            .value()
            .id()
            .is_some_and(|id| id.eq_ignore_ascii_case("content"))
    });
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

#[async_trait]
impl Filter for HtmlContentFinder {
    fn name(&self) -> &str {
        NAME
    }

    fn accept(&self) -> ContentTypes {
        content_types([TEXT_HTML, HTML_FRAGMENT])
    }

    fn content_types(&self) -> ContentTypes {
        content_types([HTML_FRAGMENT])
    }

    async fn enter(&mut self) -> Result<(), StageError> {
        self.selectors = Some(Selectors {
            chrome: html::selector(NAME, CHROME)?,
            main: html::selector(NAME, "main")?,
            article: html::selector(NAME, "article")?,
        });
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        self.selectors = None;
        Ok(())
    }

    async fn transform(
        &mut self,
        input: ContentResult,
        wanted: &ContentTypes,
    ) -> Result<Option<ContentResult>, StageError> {
        if !wanted.contains(HTML_FRAGMENT) {
            return Err(StageError::no_wanted_type(NAME, wanted));
        }
        if !self.accept().contains(&input.content_type) {
            return Err(StageError::unsupported(NAME, &input.content_type));
        }
        let selectors = self.selectors.as_ref().ok_or_else(|| StageError::not_entered(NAME))?;

        let cleaned = Self::clean(selectors, &html::markup(&input));
        Ok(cleaned.map(|fragment| input.derive(Content::Text(fragment), HTML_FRAGMENT)))
    }
}

/// Factory for [`HtmlContentFinder`].
#[derive(Debug, Default)]
pub struct HtmlContentFinderPlugin;

impl PluginFactory for HtmlContentFinderPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn module(&self) -> &str {
        module_path!()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Filter]
    }

    fn accepts(&self) -> ContentTypes {
        content_types([TEXT_HTML, HTML_FRAGMENT])
    }

    fn produces(&self) -> ContentTypes {
        content_types([HTML_FRAGMENT])
    }

    fn create_filter(&self, _ctx: &PluginContext) -> Result<Box<dyn Filter>, PluginError> {
        Ok(Box::new(HtmlContentFinder::new()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;

    fn page(body: &str) -> ContentResult {
        let url = Url::parse("https://example.com/post").unwrap();
        ContentResult::downloaded(
            url.clone(),
            url,
            Content::Bytes(body.as_bytes().to_vec()),
            TEXT_HTML,
            None,
        )
    }

    async fn run(body: &str) -> Option<ContentResult> {
        let mut finder = HtmlContentFinder::new();
        finder.enter().await.unwrap();
        finder
            .transform(page(body), &content_types([HTML_FRAGMENT]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_strips_chrome_and_scopes_to_article() {
        let out = run(
            "<html><body><header>Site</header><nav>Menu</nav>\
             <article><h1>Post</h1><!-- hidden --><p>Body</p><script>x()</script></article>\
             <form><input></form></body></html>",
        )
        .await
        .unwrap();

        let fragment = out.content.as_text().unwrap();
        assert!(fragment.starts_with("<article>"));
        assert!(fragment.contains("Body"));
        assert!(!fragment.contains("Menu"));
        assert!(!fragment.contains("hidden"));
        assert!(!fragment.contains("x()"));
        assert_eq!(out.content_type, HTML_FRAGMENT);
        assert_eq!(out.previous.as_deref().unwrap().content_type, TEXT_HTML);
    }

    #[tokio::test]
    async fn test_multiple_articles_are_not_scoped() {
        let out = run("<body><article>One</article><article>Two</article></body>")
            .await
            .unwrap();

        let fragment = out.content.as_text().unwrap();
        assert!(fragment.contains("One") && fragment.contains("Two"));
    }

    #[tokio::test]
    async fn test_scopes_to_content_id_case_insensitively() {
        let out = run("<body><div>Sidebar</div><div id=\"Content\">Main text</div></body>")
            .await
            .unwrap();

        let fragment = out.content.as_text().unwrap();
        assert!(fragment.contains("Main text"));
        assert!(!fragment.contains("Sidebar"));
    }

    #[tokio::test]
    async fn test_page_of_only_chrome_is_dropped() {
        assert!(run("<body><nav>Menu</nav><script>x()</script></body>").await.is_none());
    }

    #[tokio::test]
    async fn test_transform_requires_enter() {
        let mut finder = HtmlContentFinder::new();
        let err = finder
            .transform(page("<p>x</p>"), &content_types([HTML_FRAGMENT]))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotEntered { .. }));
    }
}
