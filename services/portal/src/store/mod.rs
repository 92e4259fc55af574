//! Storage access layer.
//!
//! The core never talks to a database driver directly; everything goes
//! through the [`Collection`] trait so the same query code runs against a
//! real document store or the in-memory backend used for local development
//! and tests.

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

mod exec;
mod memory;

pub use memory::{MemoryCollection, MemoryStore};

/// A snapshot document. The `Configuration` payload is resource-type
/// specific, so documents stay as free-form JSON.
pub type Document = Value;

/// Async cursor over matching documents.
pub type DocumentStream = BoxStream<'static, Result<Document, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("store initialization failed: {0}")]
    Init(String),
    #[error("invalid aggregation pipeline: {0}")]
    InvalidPipeline(String),
}

/// Options accepted by `find`/`find_one`.
///
/// `projection` is a `{field: 1}` inclusion document, `sort` maps field
/// paths to `1`/`-1` in significance order.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Option<Value>,
}

impl FindOptions {
    pub fn sorted(sort: Value) -> Self {
        Self {
            projection: None,
            sort: Some(sort),
        }
    }

    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// One named collection of snapshot documents.
#[async_trait::async_trait]
pub trait Collection: Send + Sync {
    async fn find(&self, filter: Value, options: FindOptions) -> Result<DocumentStream, StoreError>;

    async fn find_one(
        &self,
        filter: Value,
        options: FindOptions,
    ) -> Result<Option<Document>, StoreError>;

    async fn aggregate(&self, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError>;
}

/// Resolves collection names to accessors. Implemented by the backing store
/// and by the security-scoping wrapper around it.
pub trait CollectionSource: Send + Sync {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError>;
}

impl<T: CollectionSource + ?Sized> CollectionSource for Arc<T> {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        (**self).collection(name)
    }
}

/// Lazily-initialized process-wide store handle.
///
/// All requests share one store; the first caller runs the initialization
/// future and racing callers await the same attempt instead of opening
/// duplicate backends. A failed initialization propagates to the callers
/// racing on it and leaves the cell empty, so a later request retries from
/// a clean state rather than observing a half-built handle.
pub struct SharedStore {
    cell: OnceCell<MemoryStore>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_init<F>(
        &self,
        init: impl FnOnce() -> F,
    ) -> Result<&MemoryStore, StoreError>
    where
        F: Future<Output = Result<MemoryStore, StoreError>>,
    {
        self.cell.get_or_try_init(init).await
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up a dotted field path, e.g. `accountDetails.tenant.id`.
pub fn path_get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Like [`path_get`] but fans out over arrays the way document stores do:
/// `Tags.Key` against an array of tags yields every tag's `Key`.
pub fn path_get_all<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    fn walk<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
        match segments.split_first() {
            None => out.push(value),
            Some((head, rest)) => match value {
                Value::Object(map) => {
                    if let Some(next) = map.get(*head) {
                        walk(next, rest, out);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        walk(item, segments, out);
                    }
                }
                _ => {}
            },
        }
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    walk(doc, &segments, &mut out);
    out
}

/// Sets a dotted field path, creating intermediate objects as needed.
pub fn path_set(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just ensured object");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_get_traverses_nested_objects() {
        let doc = json!({"accountDetails": {"tenant": {"id": "t1"}}});
        assert_eq!(
            path_get(&doc, "accountDetails.tenant.id"),
            Some(&json!("t1"))
        );
        assert_eq!(path_get(&doc, "accountDetails.missing"), None);
    }

    #[test]
    fn path_get_all_fans_out_over_arrays() {
        let doc = json!({"Tags": [{"Key": "a"}, {"Key": "b"}]});
        let keys = path_get_all(&doc, "Tags.Key");
        assert_eq!(keys, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn path_set_creates_intermediate_objects() {
        let mut doc = json!({});
        path_set(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[tokio::test]
    async fn shared_store_initializes_once() {
        let shared = SharedStore::new();
        let first = shared
            .get_or_init(|| async { Ok(MemoryStore::empty()) })
            .await;
        assert!(first.is_ok());
        // Second init closure must not run.
        let second = shared
            .get_or_init(|| async { Err(StoreError::Init("should not run".into())) })
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn shared_store_failed_init_leaves_cell_empty() {
        let shared = SharedStore::new();
        let failed = shared
            .get_or_init(|| async { Err(StoreError::Init("boom".into())) })
            .await;
        assert!(failed.is_err());
        let retry = shared
            .get_or_init(|| async { Ok(MemoryStore::empty()) })
            .await;
        assert!(retry.is_ok());
    }
}
