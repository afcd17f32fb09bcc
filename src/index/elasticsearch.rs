use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use super::{IndexError, SEARCH_FIELDS, SearchHit, SearchIndex};
use crate::http::{ClientOptions, archiver_user_agent, build_client};

/// Elasticsearch REST client for the page index.
#[derive(Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base: String,
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for ElasticsearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchIndex")
            .field("base", &self.base)
            .field("user", &self.credentials.as_ref().map(|(user, _)| user))
            .finish_non_exhaustive()
    }
}

impl ElasticsearchIndex {
    /// Creates a client for the cluster at `host`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidUrl`] if `host` is not an http(s) URL or
    /// the HTTP client cannot be built.
    pub fn new(
        host: &str,
        user: Option<&str>,
        password: Option<&str>,
        options: &ClientOptions,
    ) -> Result<Self, IndexError> {
        let parsed = Url::parse(host).map_err(|err| IndexError::InvalidUrl {
            url: host.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IndexError::InvalidUrl {
                url: host.to_string(),
                reason: "expected an http or https URL".to_string(),
            });
        }

        let options = ClientOptions {
            user_agent: archiver_user_agent(),
            ..options.clone()
        };
        let client = build_client(&options).map_err(|err| IndexError::InvalidUrl {
            url: host.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            client,
            base: parsed.as_str().trim_end_matches('/').to_string(),
            credentials: user.map(|user| {
                (
                    user.to_string(),
                    password.unwrap_or_default().to_string(),
                )
            }),
        })
    }

    /// Creates `collection` with `definition` unless it already exists.
    ///
    /// Returns true when the collection was created.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if either request fails.
    #[instrument(skip(self, definition))]
    pub async fn ensure_index(
        &self,
        collection: &str,
        definition: &Value,
    ) -> Result<bool, IndexError> {
        const OPERATION: &str = "ensure_index";
        let url = format!("{}/{collection}", self.base);

        let response = self.send(OPERATION, self.client.head(&url)).await?;
        match response.status() {
            status if status.is_success() => return Ok(false),
            StatusCode::NOT_FOUND => {}
            status => return Err(status_error(OPERATION, status, response).await),
        }

        info!(collection, "creating search index");
        let response = self
            .send(OPERATION, self.client.put(&url).json(definition))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(OPERATION, response.status(), response).await);
        }
        Ok(true)
    }

    /// Creates the [`super::PAGES`] index with [`pages_index_definition`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if either request fails.
    pub async fn ensure_pages_index(&self) -> Result<bool, IndexError> {
        self.ensure_index(super::PAGES, &pages_index_definition()).await
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/_doc/{id}", self.base)
    }

    /// Document URL with `_source_includes` set when `fields` is non-empty.
    fn source_url(&self, collection: &str, id: &str, fields: &[&str]) -> Result<Url, IndexError> {
        let raw = self.doc_url(collection, id);
        let mut url = Url::parse(&raw).map_err(|err| IndexError::InvalidUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        if !fields.is_empty() {
            url.query_pairs_mut().append_pair("_source_includes", &fields.join(","));
        }
        Ok(url)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, IndexError> {
        let request = match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|err| IndexError::transport(operation, &err))
    }
}

async fn status_error(operation: &str, status: StatusCode, response: Response) -> IndexError {
    let body = response.text().await.unwrap_or_default();
    IndexError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        const OPERATION: &str = "exists";
        let response = self
            .send(OPERATION, self.client.head(self.doc_url(collection, id)))
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(OPERATION, status, response).await),
        }
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Value>, IndexError> {
        const OPERATION: &str = "get";
        let url = self.source_url(collection, id, fields)?;
        let response = self.send(OPERATION, self.client.get(url)).await?;
        match response.status() {
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|err| IndexError::invalid_response(OPERATION, err.to_string()))?;
                Ok(body.get("_source").cloned())
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(status_error(OPERATION, status, response).await),
        }
    }

    #[instrument(skip(self, document))]
    async fn index(&self, collection: &str, id: &str, document: &Value) -> Result<(), IndexError> {
        const OPERATION: &str = "index";
        let response = self
            .send(
                OPERATION,
                self.client.put(self.doc_url(collection, id)).json(document),
            )
            .await?;
        if !response.status().is_success() {
            return Err(status_error(OPERATION, response.status(), response).await);
        }
        debug!("document indexed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn search(
        &self,
        collection: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        const OPERATION: &str = "search";
        let body = json!({
            "query": { "match": { "text": query } },
            "explain": true,
            "size": size,
            "_source": { "includes": SEARCH_FIELDS },
        });
        let response = self
            .send(
                OPERATION,
                self.client
                    .post(format!("{}/{collection}/_search", self.base))
                    .json(&body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(status_error(OPERATION, response.status(), response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| IndexError::invalid_response(OPERATION, err.to_string()))?;
        parse_hits(&body)
    }
}

fn parse_hits(body: &Value) -> Result<Vec<SearchHit>, IndexError> {
    let Some(hits) = body.pointer("/hits/hits").and_then(Value::as_array) else {
        return Err(IndexError::invalid_response("search", "missing hits.hits array"));
    };

    Ok(hits
        .iter()
        .filter_map(|hit| {
            Some(SearchHit {
                id: hit.get("_id")?.as_str()?.to_string(),
                score: hit.get("_score").and_then(Value::as_f64).unwrap_or_default(),
                source: hit.get("_source").cloned().unwrap_or(Value::Null),
                explanation: hit
                    .get("_explanation")
                    .map(term_contributions)
                    .unwrap_or_default(),
            })
        })
        .collect())
}

/// Maps each `weight(field:term in doc)` detail of a `sum of:` node to its value.
fn term_contributions(explanation: &Value) -> BTreeMap<String, f64> {
    let mut terms = BTreeMap::new();
    let details = explanation.get("details").and_then(Value::as_array);
    let description = explanation.get("description").and_then(Value::as_str);

    match (description, details) {
        (Some("sum of:"), Some(details)) => {
            for detail in details {
                if let Some((term, value)) = weight_term(detail) {
                    terms.insert(term, value);
                }
            }
        }
        _ => {
            if let Some((term, value)) = weight_term(explanation) {
                terms.insert(term, value);
            }
        }
    }
    terms
}

fn weight_term(detail: &Value) -> Option<(String, f64)> {
    let description = detail.get("description")?.as_str()?;
    let inner = description.strip_prefix("weight(")?;
    let (field_term, _) = inner.split_once(" in ")?;
    let term = field_term.split_once(':').map_or(field_term, |(_, term)| term);
    Some((term.to_string(), detail.get("value")?.as_f64()?))
}

/// Index settings and mappings for [`super::PAGES`].
///
/// `text` uses a tf-idf scripted similarity with an English stopword
/// analyzer and keeps term vectors for highlighting.
#[must_use]
pub fn pages_index_definition() -> Value {
    json!({
        "settings": {
            "similarity": {
                "scripted_tfidf": {
                    "type": "scripted",
                    "weight_script": {
                        "source": "double idf = Math.log((field.docCount+1.0)/(term.docFreq+1.0)) + 1.0; return query.boost * idf;"
                    },
                    "script": {
                        "source": "double tf = Math.sqrt(doc.freq); double norm = 1/Math.sqrt(doc.length); return weight * tf * norm;"
                    }
                }
            },
            "analysis": {
                "analyzer": {
                    "english_text": { "type": "standard", "stopwords": "_english_" }
                }
            }
        },
        "mappings": {
            "properties": {
                "text": {
                    "type": "text",
                    "similarity": "scripted_tfidf",
                    "term_vector": "with_offsets",
                    "store": true,
                    "analyzer": "english_text"
                },
                "timestamp": { "type": "date" },
                "url": { "type": "keyword" }
            }
        }
    })
}
