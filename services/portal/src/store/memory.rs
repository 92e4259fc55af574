//! In-memory document store used for local development and tests.
//!
//! Collections are an explicit registry seeded at startup; asking for a
//! name that was never registered is an error rather than silently creating
//! an empty collection.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;
use serde_json::Value;
use tracing::debug;

use super::exec;
use super::{Collection, CollectionSource, Document, DocumentStream, FindOptions, StoreError};

#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    /// Builds a store from a `{collection_name: [documents]}` seed object.
    pub fn from_seed(seed: Value) -> Result<Self, StoreError> {
        let map = seed
            .as_object()
            .ok_or_else(|| StoreError::Init("seed data must be a JSON object".into()))?;
        let mut collections = HashMap::new();
        for (name, docs) in map {
            let docs = docs.as_array().ok_or_else(|| {
                StoreError::Init(format!("seed for collection {name} must be an array"))
            })?;
            collections.insert(name.clone(), docs.clone());
        }
        debug!(collections = collections.len(), "seeded in-memory store");
        Ok(Self {
            collections: Arc::new(collections),
        })
    }

    pub fn empty() -> Self {
        Self {
            collections: Arc::new(HashMap::new()),
        }
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    pub(crate) fn docs(&self, name: &str) -> Option<&[Document]> {
        self.collections.get(name).map(Vec::as_slice)
    }
}

impl CollectionSource for MemoryStore {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        if !self.collections.contains_key(name) {
            return Err(StoreError::UnknownCollection(name.to_string()));
        }
        Ok(Arc::new(MemoryCollection {
            store: self.clone(),
            name: name.to_string(),
        }))
    }
}

pub struct MemoryCollection {
    store: MemoryStore,
    name: String,
}

impl MemoryCollection {
    fn select(&self, filter: &Value, options: &FindOptions) -> Vec<Document> {
        let docs = self.store.docs(&self.name).unwrap_or(&[]);
        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|doc| exec::matches(doc, filter))
            .cloned()
            .collect();
        if let Some(sort) = &options.sort {
            sort_documents(&mut matched, sort);
        }
        if let Some(projection) = &options.projection {
            matched = matched
                .iter()
                .map(|doc| exec::project(doc, projection))
                .collect();
        }
        matched
    }
}

#[async_trait::async_trait]
impl Collection for MemoryCollection {
    async fn find(&self, filter: Value, options: FindOptions) -> Result<DocumentStream, StoreError> {
        let matched = self.select(&filter, &options);
        Ok(Box::pin(stream::iter(
            matched.into_iter().map(Ok::<Document, StoreError>),
        )))
    }

    async fn find_one(
        &self,
        filter: Value,
        options: FindOptions,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.select(&filter, &options).into_iter().next())
    }

    async fn aggregate(&self, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        let docs = self.store.docs(&self.name).unwrap_or(&[]).to_vec();
        exec::run_pipeline(&self.store, docs, &pipeline)
    }
}

pub(crate) fn sort_documents(docs: &mut [Document], sort: &Value) {
    let Some(spec) = sort.as_object() else {
        return;
    };
    docs.sort_by(|a, b| {
        for (path, direction) in spec {
            let av = super::path_get(a, path);
            let bv = super::path_get(b, path);
            let ord = exec::compare_values(av, bv);
            let ord = if direction.as_i64() == Some(-1) {
                ord.reverse()
            } else {
                ord
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "tags": [
                {"account_id": "111111111111", "resource_id": "arn:a", "year": 2024, "month": 1, "day": 14},
                {"account_id": "111111111111", "resource_id": "arn:a", "year": 2024, "month": 1, "day": 15},
                {"account_id": "222222222222", "resource_id": "arn:b", "year": 2024, "month": 1, "day": 15}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_collection_is_an_error() {
        let err = store().collection("nope").err().unwrap();
        assert!(matches!(err, StoreError::UnknownCollection(name) if name == "nope"));
    }

    #[tokio::test]
    async fn find_filters_and_sorts() {
        let coll = store().collection("tags").unwrap();
        let docs: Vec<_> = coll
            .find(
                json!({"account_id": "111111111111"}),
                FindOptions::sorted(json!({"day": -1})),
            )
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["day"], json!(15));
    }

    #[tokio::test]
    async fn find_one_applies_projection() {
        let coll = store().collection("tags").unwrap();
        let doc = coll
            .find_one(
                json!({"year": 2024, "month": 1}),
                FindOptions::sorted(json!({"day": -1}))
                    .with_projection(json!({"year": 1, "month": 1, "day": 1})),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"year": 2024, "month": 1, "day": 15}));
    }
}
