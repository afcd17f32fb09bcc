//! History from a plain text file, one `URL[<TAB>title]` per line.
//!
//! Blank lines and lines starting with `#` are skipped. Every entry is dated
//! with the file's modification time.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::history::HistoryItem;
use crate::plugin::{Capability, PluginError, PluginFactory};
use crate::source::{HistorySource, HistoryStream, SourceError};

const NAME: &str = "UrlList";

#[derive(Debug, Deserialize)]
struct UrlListConfig {
    path: PathBuf,
}

#[derive(Debug)]
pub struct UrlListSource {
    path: PathBuf,
    opened: Option<(BufReader<File>, DateTime<Utc>)>,
}

impl UrlListSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            opened: None,
        }
    }
}

#[async_trait]
impl HistorySource for UrlListSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn enter(&mut self) -> Result<(), SourceError> {
        let shown = self.path.display().to_string();
        let file = File::open(&self.path)
            .await
            .map_err(|err| SourceError::io(&shown, err))?;
        let last_visit = file
            .metadata()
            .await
            .and_then(|metadata| metadata.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        info!(path = %shown, "reading URL list");
        self.opened = Some((BufReader::new(file), last_visit));
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), SourceError> {
        self.opened = None;
        Ok(())
    }

    fn items(&mut self) -> HistoryStream<'_> {
        let Some((reader, last_visit)) = self.opened.take() else {
            return stream::once(async { Err(SourceError::NotEntered(NAME.to_string())) }).boxed();
        };
        let path = self.path.display().to_string();

        stream::unfold(Some((reader, 0usize)), move |state| {
            let path = path.clone();
            async move {
                let (mut reader, mut line_no) = state?;
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => {
                            debug!(path = %path, lines = line_no, "URL list exhausted");
                            return None;
                        }
                        Ok(_) => {
                            line_no += 1;
                            let parsed = std::str::from_utf8(&buf)
                                .map_err(|err| SourceError::Parse {
                                    line: line_no,
                                    message: format!("not valid UTF-8: {err}"),
                                })
                                .and_then(|line| parse_line(line, line_no, last_visit));
                            match parsed {
                                Ok(Some(item)) => {
                                    return Some((Ok(item), Some((reader, line_no))));
                                }
                                Ok(None) => {}
                                Err(err) => return Some((Err(err), Some((reader, line_no)))),
                            }
                        }
                        Err(err) => return Some((Err(SourceError::io(path, err)), None)),
                    }
                }
            }
        })
        .boxed()
    }
}

fn parse_line(
    line: &str,
    line_no: usize,
    last_visit: DateTime<Utc>,
) -> Result<Option<HistoryItem>, SourceError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return Ok(None);
    }

    let (url, title) = match line.split_once('\t') {
        Some((url, title)) => (url.trim(), Some(title.trim()).filter(|t| !t.is_empty())),
        None => (line.trim(), None),
    };
    if url.is_empty() {
        return Err(SourceError::Parse {
            line: line_no,
            message: "missing URL before title".to_string(),
        });
    }

    Ok(Some(HistoryItem::new(url, title.map(str::to_string), last_visit)))
}

/// Factory for [`UrlListSource`]; configured with `{"path": "<file>"}`.
#[derive(Debug, Default)]
pub struct UrlListPlugin;

impl PluginFactory for UrlListPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn module(&self) -> &str {
        module_path!()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Source]
    }

    fn create_source(&self, config: &Value) -> Result<Box<dyn HistorySource>, PluginError> {
        let config: UrlListConfig = serde_json::from_value(config.clone())
            .map_err(|err| PluginError::create(NAME, err.to_string()))?;
        Ok(Box::new(UrlListSource::new(config.path)))
    }
}
