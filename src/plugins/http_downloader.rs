//! HTML page downloader over a pooled reqwest client.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::http::{ClientOptions, build_client};
use crate::pipeline::{
    Content, ContentResult, ContentTypes, Downloader, StageError, TEXT_HTML, content_types,
};
use crate::plugin::{Capability, PluginContext, PluginError, PluginFactory};

const NAME: &str = "HttpDownloader";

/// Fetches `text/html` pages.
///
/// The client is created on enter and dropped on exit, so each worker holds
/// its own connection pool only while it runs.
#[derive(Debug)]
pub struct HttpDownloader {
    options: ClientOptions,
    client: Option<Client>,
}

impl HttpDownloader {
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            client: None,
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        NAME
    }

    fn content_types(&self) -> ContentTypes {
        content_types([TEXT_HTML])
    }

    async fn enter(&mut self) -> Result<(), StageError> {
        if self.client.is_none() {
            let client = build_client(&self.options)
                .map_err(|err| StageError::lifecycle(NAME, err.to_string()))?;
            self.client = Some(client);
        }
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        self.client = None;
        Ok(())
    }

    #[instrument(skip(self, wanted), fields(url = %url))]
    async fn download(
        &mut self,
        url: &Url,
        wanted: &ContentTypes,
    ) -> Result<Option<ContentResult>, StageError> {
        if !wanted.contains(TEXT_HTML) {
            return Err(StageError::no_wanted_type(NAME, wanted));
        }
        let client = self.client.as_ref().ok_or_else(|| StageError::not_entered(NAME))?;

        let response = match client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) if err.is_redirect() => {
                error!(error = %err, "redirected too many times");
                return Ok(None);
            }
            Err(err) => {
                warn!(error = %err, "request failed");
                return Ok(None);
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "unexpected HTTP status");
            return Ok(None);
        }

        let header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let (mime, charset) = parse_content_type(header);
        if mime != TEXT_HTML {
            warn!(content_type = %header, "non-HTML content type");
            return Ok(None);
        }

        let final_url = response.url().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to read response body");
                return Ok(None);
            }
        };
        debug!(bytes = body.len(), final_url = %final_url, charset = ?charset, "downloaded page");

        Ok(Some(ContentResult::downloaded(
            final_url,
            url.clone(),
            Content::Bytes(body.to_vec()),
            TEXT_HTML,
            charset,
        )))
    }
}

/// Splits a `Content-Type` header into its lowercase media type and charset.
fn parse_content_type(header: &str) -> (String, Option<String>) {
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    });
    (mime, charset)
}

/// Factory for [`HttpDownloader`].
#[derive(Debug, Default)]
pub struct HttpDownloaderPlugin;

impl PluginFactory for HttpDownloaderPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn module(&self) -> &str {
        module_path!()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Downloader]
    }

    fn produces(&self) -> ContentTypes {
        content_types([TEXT_HTML])
    }

    fn create_downloader(&self, ctx: &PluginContext) -> Result<Box<dyn Downloader>, PluginError> {
        Ok(Box::new(HttpDownloader::new(ctx.http.clone())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pipeline::HTML_FRAGMENT;

    #[test]
    fn test_parse_content_type_extracts_charset() {
        assert_eq!(
            parse_content_type("text/HTML; charset=\"ISO-8859-1\""),
            ("text/html".to_string(), Some("ISO-8859-1".to_string()))
        );
        assert_eq!(parse_content_type("text/html"), ("text/html".to_string(), None));
        assert_eq!(parse_content_type(""), (String::new(), None));
    }

    #[tokio::test]
    async fn test_download_rejects_unwanted_types() {
        let mut downloader = HttpDownloader::new(ClientOptions::default());
        let err = downloader
            .download(
                &Url::parse("https://example.com/").unwrap(),
                &content_types([HTML_FRAGMENT]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NoWantedType { .. }));
    }

    #[tokio::test]
    async fn test_download_requires_enter() {
        let mut downloader = HttpDownloader::new(ClientOptions::default());
        let err = downloader
            .download(
                &Url::parse("https://example.com/").unwrap(),
                &content_types([TEXT_HTML]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotEntered { .. }));
    }
}
