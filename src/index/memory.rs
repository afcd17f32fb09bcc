use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{IndexError, SEARCH_FIELDS, SearchHit, SearchIndex};

/// In-process index. Search scores are plain term frequencies.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<(String, String), Value>>,
    writes: AtomicUsize,
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `index` calls served so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored documents across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Value>> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn key(collection: &str, id: &str) -> (String, String) {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        Ok(self.lock().contains_key(&key(collection, id)))
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Value>, IndexError> {
        let documents = self.lock();
        let Some(document) = documents.get(&key(collection, id)) else {
            return Ok(None);
        };
        if fields.is_empty() {
            return Ok(Some(document.clone()));
        }
        let selected = document
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(name, _)| fields.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(Value::Object(selected)))
    }

    async fn index(&self, collection: &str, id: &str, document: &Value) -> Result<(), IndexError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key(collection, id), document.clone());
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let documents = self.lock();

        let mut hits: Vec<SearchHit> = documents
            .iter()
            .filter(|((doc_collection, _), _)| doc_collection == collection)
            .filter_map(|((_, id), document)| {
                let text = document.get("text").and_then(Value::as_str)?.to_lowercase();
                let mut explanation = BTreeMap::new();
                for term in &terms {
                    #[allow(clippy::cast_precision_loss)]
                    let frequency =
                        text.split_whitespace().filter(|word| word == term).count() as f64;
                    if frequency > 0.0 {
                        explanation.insert(term.clone(), frequency);
                    }
                }
                if explanation.is_empty() {
                    return None;
                }
                Some(SearchHit {
                    id: id.clone(),
                    score: explanation.values().sum(),
                    source: project(document),
                    explanation,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(size);
        Ok(hits)
    }
}

fn project(document: &Value) -> Value {
    let mut source = Map::new();
    for field in SEARCH_FIELDS {
        if let Some(value) = document.get(field) {
            source.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(source)
}
