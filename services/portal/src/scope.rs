//! Security scoping.
//!
//! Computes the set of account ids visible to the requester and wraps
//! collection access so every query issued through the wrapper carries the
//! account filter. Once a non-wildcard scope is constructed, no code path
//! through the proxy can bypass it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::accounts::AccountDirectory;
use crate::store::{Collection, CollectionSource, Document, DocumentStream, FindOptions, StoreError};

/// Identity supplied by the auth layer when a user is logged in.
#[derive(Debug, Clone)]
pub struct UserClaims {
    pub email: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Unrestricted. Also used for system/background contexts.
    All,
    Accounts(BTreeSet<String>),
}

/// Claim groups may carry `/`-delimited namespace prefixes; only the last
/// segment is compared against configured team names.
pub fn strip_namespace(group: &str) -> &str {
    group.rsplit('/').next().unwrap_or(group)
}

/// Resolves the requester's scope.
///
/// The administrator email gets full access, and so does the absence of an
/// authenticated user: unauthenticated contexts are trusted by design (the
/// portal sits behind the auth collaborator; background jobs have no
/// user). Everyone else sees the accounts whose mapped team matches one of
/// their group claims.
pub fn resolve_scope(
    user: Option<&UserClaims>,
    admin_email: Option<&str>,
    directory: &AccountDirectory,
) -> Scope {
    let Some(user) = user else {
        return Scope::All;
    };
    if admin_email == Some(user.email.as_str()) {
        return Scope::All;
    }
    let groups: BTreeSet<&str> = user.groups.iter().map(|g| strip_namespace(g)).collect();
    let accounts = directory
        .mappings()
        .iter()
        .filter(|mapping| groups.contains(mapping.team.as_str()))
        .map(|mapping| mapping.account_id.clone())
        .collect();
    Scope::Accounts(accounts)
}

/// The group list fed to the pipeline `security` fragment: `["*"]` for
/// admins and unauthenticated contexts, otherwise the stripped claims.
pub fn resolve_groups(user: Option<&UserClaims>, admin_email: Option<&str>) -> Vec<String> {
    match user {
        None => vec!["*".to_string()],
        Some(user) if admin_email == Some(user.email.as_str()) => vec!["*".to_string()],
        Some(user) => user
            .groups
            .iter()
            .map(|g| strip_namespace(g).to_string())
            .collect(),
    }
}

impl Scope {
    fn account_filter(&self) -> Option<Value> {
        match self {
            Scope::All => None,
            Scope::Accounts(accounts) => {
                let ids: Vec<Value> = accounts.iter().map(|id| Value::from(id.as_str())).collect();
                Some(json!({"$in": ids}))
            }
        }
    }
}

/// Collection wrapper that intersects every query with the scope's
/// account filter. `find`/`find_one` filters are merged, not overwritten;
/// `aggregate` pipelines get a `$match` prepended.
pub struct ScopedCollection {
    scope: Scope,
    inner: Arc<dyn Collection>,
}

impl ScopedCollection {
    pub fn new(scope: Scope, inner: Arc<dyn Collection>) -> Self {
        Self { scope, inner }
    }

    fn merge_filter(&self, filter: Value) -> Value {
        let Some(account_filter) = self.scope.account_filter() else {
            return filter;
        };
        let mut merged = match filter {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        merged.insert("account_id".to_string(), account_filter);
        Value::Object(merged)
    }
}

#[async_trait::async_trait]
impl Collection for ScopedCollection {
    async fn find(&self, filter: Value, options: FindOptions) -> Result<DocumentStream, StoreError> {
        self.inner.find(self.merge_filter(filter), options).await
    }

    async fn find_one(
        &self,
        filter: Value,
        options: FindOptions,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(self.merge_filter(filter), options).await
    }

    async fn aggregate(&self, mut pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        if let Some(account_filter) = self.scope.account_filter() {
            pipeline.insert(0, json!({"$match": {"account_id": account_filter}}));
        }
        self.inner.aggregate(pipeline).await
    }
}

/// Scoped view over a whole store: every collection it hands out is
/// wrapped in a [`ScopedCollection`].
pub struct ScopedSource<S> {
    scope: Scope,
    inner: S,
}

impl<S: CollectionSource> ScopedSource<S> {
    pub fn new(scope: Scope, inner: S) -> Self {
        Self { scope, inner }
    }
}

impl<S: CollectionSource> CollectionSource for ScopedSource<S> {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        let inner = self.inner.collection(name)?;
        Ok(Arc::new(ScopedCollection::new(self.scope.clone(), inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountMapping;
    use crate::store::MemoryStore;
    use futures::TryStreamExt;

    fn directory() -> AccountDirectory {
        AccountDirectory::new(vec![
            AccountMapping {
                account_id: "111111111111".to_string(),
                team: "alpha".to_string(),
                environments: vec![],
                tenant: None,
            },
            AccountMapping {
                account_id: "222222222222".to_string(),
                team: "bravo".to_string(),
                environments: vec![],
                tenant: None,
            },
        ])
    }

    fn store() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "tags": [
                {"account_id": "111111111111", "resource_id": "r1"},
                {"account_id": "222222222222", "resource_id": "r2"}
            ]
        }))
        .unwrap()
    }

    fn claims(email: &str, groups: &[&str]) -> UserClaims {
        UserClaims {
            email: email.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn admin_and_anonymous_get_full_scope() {
        let directory = directory();
        let admin = claims("admin@example.org", &[]);
        assert_eq!(
            resolve_scope(Some(&admin), Some("admin@example.org"), &directory),
            Scope::All
        );
        assert_eq!(resolve_scope(None, Some("admin@example.org"), &directory), Scope::All);
    }

    #[test]
    fn group_claims_map_to_accounts_with_namespace_stripping() {
        let directory = directory();
        let user = claims("dev@example.org", &["idp/teams/alpha"]);
        let scope = resolve_scope(Some(&user), None, &directory);
        let expected: BTreeSet<String> = ["111111111111".to_string()].into_iter().collect();
        assert_eq!(scope, Scope::Accounts(expected));
    }

    #[test]
    fn groups_for_pipeline() {
        assert_eq!(resolve_groups(None, None), vec!["*"]);
        let user = claims("dev@example.org", &["ns/alpha", "bravo"]);
        assert_eq!(resolve_groups(Some(&user), None), vec!["alpha", "bravo"]);
    }

    #[tokio::test]
    async fn scoped_find_only_returns_visible_accounts() {
        let scope = Scope::Accounts(["111111111111".to_string()].into_iter().collect());
        let source = ScopedSource::new(scope, store());
        let coll = source.collection("tags").unwrap();
        let docs: Vec<_> = coll
            .find(json!({}), FindOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["account_id"], json!("111111111111"));
    }

    #[tokio::test]
    async fn scoped_find_merges_existing_filter() {
        let scope = Scope::Accounts(["111111111111".to_string()].into_iter().collect());
        let source = ScopedSource::new(scope, store());
        let coll = source.collection("tags").unwrap();
        let doc = coll
            .find_one(json!({"resource_id": "r2"}), FindOptions::default())
            .await
            .unwrap();
        // r2 belongs to an out-of-scope account.
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn scoped_aggregate_prepends_match() {
        let scope = Scope::Accounts(["111111111111".to_string()].into_iter().collect());
        let source = ScopedSource::new(scope, store());
        let coll = source.collection("tags").unwrap();
        let rows = coll
            .aggregate(vec![json!({"$count": "n"})])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn wildcard_scope_delegates_unchanged() {
        let source = ScopedSource::new(Scope::All, store());
        let coll = source.collection("tags").unwrap();
        let rows = coll.aggregate(vec![json!({"$count": "n"})]).await.unwrap();
        assert_eq!(rows[0]["n"], json!(2));
    }
}
