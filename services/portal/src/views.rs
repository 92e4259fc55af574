//! View and rule definitions and their execution.
//!
//! A view is a reusable tabular/detail query over snapshot data; a rule is
//! a compliance check on top of a view, scored per group against a
//! threshold. Definitions are registered explicitly at startup and run
//! through the composed fragment pipelines from [`crate::pipeline`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::pagination::{self, Pagination, QueryState};
use crate::pipeline::{
    self, account_lookup, compliance_percentage, latest_only, security, FilterableField,
};
use crate::store::{CollectionSource, Document, StoreError};
use crate::tags;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const DEFAULT_THRESHOLD: u32 = 100;

/// Filter dropdowns present on every details view.
pub fn default_filterable_fields() -> Vec<FilterableField> {
    vec![
        FilterableField::new("Account ID", "accountDetails.account_id"),
        FilterableField::new("Team", "accountDetails.team"),
        FilterableField::new("Tenant", "accountDetails.tenant.id"),
    ]
}

/// Reporting dimension rows are bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    AccountId,
    Team,
    Tenant,
}

impl GroupBy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "account_id" => Some(Self::AccountId),
            "team" => Some(Self::Team),
            "tenant" => Some(Self::Tenant),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::AccountId => "account_id",
            Self::Team => "team",
            Self::Tenant => "tenant",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AccountId => "Account ID",
            Self::Team => "Team",
            Self::Tenant => "Tenant",
        }
    }

    /// Row selector for the `$group` key.
    pub fn selector(&self) -> &'static str {
        match self {
            Self::AccountId => "accountDetails.account_id",
            Self::Team => "accountDetails.team",
            Self::Tenant => "accountDetails.tenant",
        }
    }

    /// Short identifier for a group value (tenants group on the whole
    /// descriptor, so pull the id back out).
    pub fn value_to_name(&self, value: &Value) -> String {
        match self {
            Self::Tenant => value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            _ => value.as_str().unwrap_or("unknown").to_string(),
        }
    }

    pub fn value_to_long_name(&self, value: &Value) -> String {
        match self {
            Self::Tenant => {
                let id = value.get("id").and_then(Value::as_str).unwrap_or("unknown");
                let name = value.get("name").and_then(Value::as_str).unwrap_or("unknown");
                format!("[{id}] {name}")
            }
            _ => value.as_str().unwrap_or("unknown").to_string(),
        }
    }
}

/// A named, reusable query definition ending in a flat row projection.
#[derive(Clone)]
pub struct ViewDef {
    pub id: String,
    pub name: String,
    pub collection: String,
    pub pipeline: Vec<Value>,
    pub id_field: String,
    pub prominent_fields: Vec<String>,
    pub filterable_fields: Vec<FilterableField>,
    pub searchable_fields: Vec<String>,
    pub details_fields: Vec<String>,
}

/// A compliance check built atop a view.
#[derive(Clone)]
pub struct RuleDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub view: String,
    /// Stages appended after the shared prefix, producing
    /// `{_id: groupValue, rows: [...]}` documents.
    pub pipeline: Arc<dyn Fn(&str) -> Vec<Value> + Send + Sync>,
    pub header: Vec<String>,
    pub links: Vec<RuleLink>,
    /// Minimum compliant percentage for a group to report "Compliant".
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleLink {
    pub field: String,
    pub forward: Vec<String>,
    pub view: String,
}

/// Explicit registry, populated at startup.
#[derive(Default, Clone)]
pub struct Registry {
    views: Vec<ViewDef>,
    rules: Vec<RuleDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_view(&mut self, view: ViewDef) {
        self.views.push(view);
    }

    pub fn register_rule(&mut self, rule: RuleDef) {
        self.rules.push(rule);
    }

    pub fn view(&self, id: &str) -> Option<&ViewDef> {
        self.views.iter().find(|v| v.id == id)
    }

    pub fn rule(&self, id: &str) -> Option<&RuleDef> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn views(&self) -> &[ViewDef] {
        &self.views
    }

    pub fn rules(&self) -> &[RuleDef] {
        &self.rules
    }
}

/// The full filter-field list for a view: shared defaults, the view's own
/// fields, plus the hidden row-id field used by drill-down links.
pub fn view_filterable_fields(view: &ViewDef) -> Vec<FilterableField> {
    let mut filterable = default_filterable_fields();
    filterable.extend(view.filterable_fields.iter().cloned());
    filterable.push(FilterableField::hidden("Id", &view.id_field));
    filterable
}

/// One rendered page of a details view.
#[derive(Debug, Clone, Serialize)]
pub struct DetailsPage {
    pub resources: Vec<Document>,
    pub total: u64,
    pub pages: u64,
    /// Distinct observed values per visible filterable field, sorted for
    /// dropdown display.
    pub unique_fields: BTreeMap<String, Vec<String>>,
    pub pagination: Pagination,
    pub is_filtered: bool,
    pub active_filter_count: usize,
}

/// Runs a details view: shared prefix, view projection, filters, one
/// faceted pass for count + page + dropdown values.
pub async fn run_view_details(
    source: &dyn CollectionSource,
    view: &ViewDef,
    state: &QueryState,
    groups: &[String],
    path: &str,
    params: &BTreeMap<String, String>,
) -> Result<DetailsPage, StoreError> {
    let filterable = view_filterable_fields(view);

    let mut stages = latest_only();
    stages.extend(account_lookup());
    stages.extend(security(groups));
    stages.extend(view.pipeline.iter().cloned());
    stages.extend(pipeline::view_pipeline(
        state.page,
        DEFAULT_PAGE_SIZE,
        &state.filters,
        state.search.as_deref(),
        &filterable,
        &view.searchable_fields,
    ));

    let collection = source.collection(&view.collection)?;
    let mut results = collection.aggregate(stages).await?;
    let result = if results.is_empty() {
        json!({})
    } else {
        results.swap_remove(0)
    };

    let total = result
        .pointer("/metadata/0/total_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let pages = total.div_ceil(DEFAULT_PAGE_SIZE);
    let resources = result
        .get("resources")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut unique_fields = BTreeMap::new();
    if let Some(unique) = result.pointer("/uniqueFields/0") {
        for field in filterable.iter().filter(|f| !f.hide) {
            let mut values: Vec<String> = unique
                .get(&field.name)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            values.sort();
            unique_fields.insert(field.name.clone(), values);
        }
    }

    Ok(DetailsPage {
        resources,
        total,
        pages,
        unique_fields,
        pagination: pagination::paginate(path, params, state.page, pages),
        is_filtered: state.is_filtered(),
        active_filter_count: state.active_filter_count(),
    })
}

/// One group's scored rule output.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub long_name: String,
    pub rows: Vec<Document>,
    pub percentage: u32,
    pub compliant: bool,
}

/// Runs a rule grouped by `group_by` and scores each group against the
/// rule threshold. Expected groups absent from the aggregation output are
/// appended as zero-row, vacuously compliant entries so they stay visible
/// in summary tables.
pub async fn run_rule(
    source: &dyn CollectionSource,
    registry: &Registry,
    rule: &RuleDef,
    group_by: GroupBy,
    groups: &[String],
    expected_groups: &[String],
) -> Result<Vec<GroupReport>, StoreError> {
    let view = registry
        .view(&rule.view)
        .ok_or_else(|| StoreError::InvalidPipeline(format!("rule {} references unknown view {}", rule.id, rule.view)))?;

    let mut stages = latest_only();
    stages.extend(account_lookup());
    stages.extend(security(groups));
    stages.extend(view.pipeline.iter().cloned());
    stages.extend((rule.pipeline)(group_by.selector()));

    let collection = source.collection(&view.collection)?;
    let grouped = collection.aggregate(stages).await?;

    let mut reports: Vec<GroupReport> = grouped
        .into_iter()
        .map(|group| {
            let id = group.get("_id").cloned().unwrap_or(Value::Null);
            let rows = group
                .get("rows")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let percentage = compliance_percentage(&rows);
            GroupReport {
                name: group_by.value_to_name(&id),
                long_name: group_by.value_to_long_name(&id),
                rows,
                percentage,
                compliant: percentage >= rule.threshold,
            }
        })
        .collect();

    for expected in expected_groups {
        if !reports.iter().any(|r| &r.name == expected) {
            reports.push(GroupReport {
                name: expected.clone(),
                long_name: expected.clone(),
                rows: Vec::new(),
                percentage: 100,
                compliant: true,
            });
        }
    }
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(reports)
}

/// Built-in definitions.
pub fn builtin_registry(mandatory_tag: &str) -> Registry {
    let mut registry = Registry::new();
    registry.register_view(tagging_view(mandatory_tag));
    registry.register_rule(missing_tags_rule(mandatory_tag));
    registry.register_view(kms_view());
    registry.register_rule(kms_rotation_rule());
    registry
}

/// Expression: the tag key is present with a non-empty value.
fn tag_value_present(tag_name: &str) -> Value {
    json!({"$and": [
        {"$in": [
            tag_name,
            {"$map": {"input": {"$ifNull": ["$tags", []]}, "as": "tag", "in": "$$tag.Key"}}
        ]},
        {"$ne": [
            {"$arrayElemAt": [
                {"$map": {
                    "input": {"$filter": {
                        "input": {"$ifNull": ["$tags", []]},
                        "as": "tag",
                        "cond": {"$eq": ["$$tag.Key", tag_name]}
                    }},
                    "as": "filteredTag",
                    "in": "$$filteredTag.Value"
                }},
                0
            ]},
            ""
        ]}
    ]})
}

/// The composite `BSP` tag resolves to its constituent keys so the
/// drill-down agrees with the cursor aggregations; any other name is a
/// literal key lookup.
fn missing_tag_condition(tag_name: &str) -> Value {
    let present = if tag_name == tags::BSP {
        json!({"$and": [
            tag_value_present("BillingID"),
            {"$or": [tag_value_present("Service"), tag_value_present("Project")]}
        ]})
    } else {
        tag_value_present(tag_name)
    };
    json!({"$cond": {"if": present, "then": "false", "else": "true"}})
}

/// Tagging details view over the resource-tag snapshots. The missing-tag
/// column carries string `"true"`/`"false"` values so it doubles as a
/// filter-dropdown field.
fn tagging_view(mandatory_tag: &str) -> ViewDef {
    let display = format!("Missing {mandatory_tag}");
    ViewDef {
        id: "resource_tagging".to_string(),
        name: "Tagging of Resources".to_string(),
        collection: "tags".to_string(),
        pipeline: vec![
            json!({"$addFields": {
                "tags": {"$ifNull": ["$Tags", []]},
                "missing_tag": missing_tag_condition(mandatory_tag)
            }}),
            json!({"$project": {
                "_id": 0,
                "account_id": 1,
                "accountDetails": 1,
                "Resource Type": "$resource_type",
                "Arn": "$resource_id",
                "Id": "$resource_id",
                (display.as_str()): "$missing_tag",
                "All Tags": {"$reduce": {
                    "input": {"$ifNull": ["$Tags", []]},
                    "initialValue": "",
                    "in": {"$concat": ["$$value", "$$this.Key", "=", "$$this.Value", " "]}
                }}
            }}),
        ],
        id_field: "Id".to_string(),
        prominent_fields: vec!["Resource Type".to_string()],
        filterable_fields: vec![
            FilterableField::new("Resource Type", "Resource Type"),
            FilterableField::new(&display, &display),
        ],
        searchable_fields: vec![
            "Arn".to_string(),
            "Id".to_string(),
            "All Tags".to_string(),
        ],
        details_fields: vec!["Arn".to_string(), display, "All Tags".to_string()],
    }
}

fn missing_tags_rule(mandatory_tag: &str) -> RuleDef {
    let display = format!("Missing {mandatory_tag}");
    let display_for_pipeline = display.clone();
    RuleDef {
        id: "TAG1".to_string(),
        name: "Missing Tags".to_string(),
        description: "Organisational required tags that are missing from resources.".to_string(),
        view: "resource_tagging".to_string(),
        pipeline: Arc::new(move |group_key| {
            let display = display_for_pipeline.as_str();
            vec![
                json!({"$group": {
                    "_id": {
                        "key": format!("${group_key}"),
                        "Resource Type": "$Resource Type",
                        (display): format!("${display}")
                    },
                    "count": {"$count": {}}
                }}),
                json!({"$group": {
                    "_id": "$_id.key",
                    "rows": {"$push": {
                        "Resource Type": "$_id.Resource Type",
                        (display): format!("$_id.{display}"),
                        "Count": {"$sum": "$count"},
                        "Compliant": {"$eq": [format!("$_id.{display}"), "false"]}
                    }}
                }}),
            ]
        }),
        header: vec![
            "Resource Type".to_string(),
            display.clone(),
            "Count".to_string(),
        ],
        links: vec![RuleLink {
            field: "Count".to_string(),
            forward: vec!["Resource Type".to_string(), display],
            view: "resource_tagging".to_string(),
        }],
        threshold: 98,
    }
}

/// KMS key details view over key metadata snapshots.
fn kms_view() -> ViewDef {
    ViewDef {
        id: "kms_keys".to_string(),
        name: "KMS Keys".to_string(),
        collection: "kms_key_metadata".to_string(),
        pipeline: vec![json!({"$project": {
            "_id": 0,
            "account_id": 1,
            "accountDetails": 1,
            "Arn": {"$ifNull": ["$Configuration.Arn", "unknown"]},
            "Id": {"$ifNull": ["$Configuration.KeyId", "unknown"]},
            "Key Manager": {"$ifNull": ["$Configuration.KeyManager", "unknown"]},
            "Rotation Enabled": {"$cond": {
                "if": {"$eq": ["$Configuration.KeyRotationEnabled", true]},
                "then": "true",
                "else": "false"
            }}
        }})],
        id_field: "Id".to_string(),
        prominent_fields: vec!["Key Manager".to_string()],
        filterable_fields: vec![
            FilterableField::new("Key Manager", "Key Manager"),
            FilterableField::new("Rotation Enabled", "Rotation Enabled"),
        ],
        searchable_fields: vec!["Arn".to_string(), "Id".to_string()],
        details_fields: vec![
            "Arn".to_string(),
            "Key Manager".to_string(),
            "Rotation Enabled".to_string(),
        ],
    }
}

fn kms_rotation_rule() -> RuleDef {
    RuleDef {
        id: "KMS1".to_string(),
        name: "Key Rotation".to_string(),
        description: "Customer-managed KMS keys must have automatic rotation enabled."
            .to_string(),
        view: "kms_keys".to_string(),
        pipeline: Arc::new(|group_key| {
            vec![
                json!({"$group": {
                    "_id": {
                        "key": format!("${group_key}"),
                        "Rotation Enabled": "$Rotation Enabled"
                    },
                    "count": {"$count": {}}
                }}),
                json!({"$group": {
                    "_id": "$_id.key",
                    "rows": {"$push": {
                        "Rotation Enabled": "$_id.Rotation Enabled",
                        "Count": {"$sum": "$count"},
                        "Compliant": {"$eq": ["$_id.Rotation Enabled", "true"]}
                    }}
                }}),
            ]
        }),
        header: vec!["Rotation Enabled".to_string(), "Count".to_string()],
        links: vec![RuleLink {
            field: "Count".to_string(),
            forward: vec!["Rotation Enabled".to_string()],
            view: "kms_keys".to_string(),
        }],
        threshold: DEFAULT_THRESHOLD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded_store() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "tags": [
                {
                    "account_id": "111111111111", "resource_id": "arn:aws:s3:::alpha-data",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 15,
                    "Tags": [{"Key": "BillingID", "Value": "B1"}]
                },
                {
                    "account_id": "111111111111", "resource_id": "arn:aws:s3:::alpha-data",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 14,
                    "Tags": []
                },
                {
                    "account_id": "222222222222", "resource_id": "arn:aws:s3:::bravo-data",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 15,
                    "Tags": []
                }
            ],
            "kms_key_metadata": [
                {
                    "account_id": "111111111111", "resource_id": "key-1",
                    "year": 2024, "month": 1, "day": 15,
                    "Configuration": {"Arn": "arn:kms:key-1", "KeyId": "key-1",
                        "KeyManager": "CUSTOMER", "KeyRotationEnabled": true}
                },
                {
                    "account_id": "222222222222", "resource_id": "key-2",
                    "year": 2024, "month": 1, "day": 15,
                    "Configuration": {"Arn": "arn:kms:key-2", "KeyId": "key-2",
                        "KeyManager": "CUSTOMER", "KeyRotationEnabled": false}
                }
            ],
            "account_details": [
                {"account_id": "111111111111", "team": "alpha",
                 "tenant": {"id": "t1", "name": "Tenant One"}, "groups": ["alpha"]},
                {"account_id": "222222222222", "team": "bravo",
                 "tenant": {"id": "t2", "name": "Tenant Two"}, "groups": ["bravo"]}
            ]
        }))
        .unwrap()
    }

    fn wildcard() -> Vec<String> {
        vec!["*".to_string()]
    }

    #[tokio::test]
    async fn details_view_selects_latest_day_only() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let view = registry.view("resource_tagging").unwrap();
        let state = QueryState {
            page: 1,
            ..QueryState::default()
        };
        let page = run_view_details(
            &store,
            view,
            &state,
            &wildcard(),
            "/view/resource_tagging",
            &BTreeMap::new(),
        )
        .await
        .unwrap();
        // Jan 14 snapshot of alpha-data superseded by Jan 15.
        assert_eq!(page.total, 2);
        assert_eq!(page.resources.len(), 2);
        let missing: Vec<_> = page
            .resources
            .iter()
            .map(|r| r["Missing BillingID"].as_str().unwrap())
            .collect();
        assert_eq!(missing, vec!["false", "true"]);
    }

    #[tokio::test]
    async fn details_view_renders_empty_collection_as_empty_page() {
        let store = MemoryStore::from_seed(json!({
            "tags": [],
            "account_details": []
        }))
        .unwrap();
        let registry = builtin_registry("BillingID");
        let view = registry.view("resource_tagging").unwrap();
        let state = QueryState {
            page: 1,
            ..QueryState::default()
        };
        let page = run_view_details(&store, view, &state, &wildcard(), "/v", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.resources.is_empty());
        assert_eq!(page.pages, 0);
    }

    #[tokio::test]
    async fn composite_tag_view_honours_constituent_keys() {
        let store = MemoryStore::from_seed(json!({
            "tags": [
                {
                    "account_id": "111111111111", "resource_id": "arn:aws:s3:::alpha-data",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 15,
                    "Tags": [{"Key": "BillingID", "Value": "B1"},
                             {"Key": "Service", "Value": "S1"}]
                },
                {
                    "account_id": "111111111111", "resource_id": "arn:aws:s3:::beta-data",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 15,
                    "Tags": [{"Key": "Service", "Value": "S1"}]
                }
            ],
            "account_details": [
                {"account_id": "111111111111", "team": "alpha",
                 "tenant": {"id": "t1", "name": "Tenant One"}, "groups": ["alpha"]}
            ]
        }))
        .unwrap();
        let registry = builtin_registry(tags::BSP);
        let view = registry.view("resource_tagging").unwrap();
        let state = QueryState {
            page: 1,
            ..QueryState::default()
        };
        let page = run_view_details(&store, view, &state, &wildcard(), "/v", &BTreeMap::new())
            .await
            .unwrap();
        let missing: BTreeMap<&str, &str> = page
            .resources
            .iter()
            .map(|r| {
                (
                    r["Arn"].as_str().unwrap(),
                    r["Missing BSP"].as_str().unwrap(),
                )
            })
            .collect();
        // BillingID plus Service satisfies the composite; Service alone does not.
        assert_eq!(missing["arn:aws:s3:::alpha-data"], "false");
        assert_eq!(missing["arn:aws:s3:::beta-data"], "true");
    }

    #[tokio::test]
    async fn details_view_search_and_dropdowns() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let view = registry.view("resource_tagging").unwrap();
        let state = QueryState {
            page: 1,
            search: Some("bravo".to_string()),
            ..QueryState::default()
        };
        let page = run_view_details(&store, view, &state, &wildcard(), "/v", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.is_filtered);
        assert_eq!(page.unique_fields["Team"], vec!["bravo"]);
    }

    #[tokio::test]
    async fn rule_groups_and_scores_by_team() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let rule = registry.rule("TAG1").unwrap();
        let reports = run_rule(&store, &registry, rule, GroupBy::Team, &wildcard(), &[])
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        let alpha = reports.iter().find(|r| r.name == "alpha").unwrap();
        assert_eq!(alpha.percentage, 100);
        assert!(alpha.compliant);
        let bravo = reports.iter().find(|r| r.name == "bravo").unwrap();
        assert_eq!(bravo.percentage, 0);
        assert!(!bravo.compliant);
    }

    #[tokio::test]
    async fn rule_groups_by_tenant_with_long_names() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let rule = registry.rule("KMS1").unwrap();
        let reports = run_rule(&store, &registry, rule, GroupBy::Tenant, &wildcard(), &[])
            .await
            .unwrap();
        let t1 = reports.iter().find(|r| r.name == "t1").unwrap();
        assert_eq!(t1.long_name, "[t1] Tenant One");
        assert!(t1.compliant);
        let t2 = reports.iter().find(|r| r.name == "t2").unwrap();
        assert!(!t2.compliant);
    }

    #[tokio::test]
    async fn rule_restricted_by_security_groups() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let rule = registry.rule("TAG1").unwrap();
        let reports = run_rule(
            &store,
            &registry,
            rule,
            GroupBy::Team,
            &["alpha".to_string()],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "alpha");
    }

    #[tokio::test]
    async fn missing_expected_groups_appear_vacuously_compliant() {
        let store = seeded_store();
        let registry = builtin_registry("BillingID");
        let rule = registry.rule("TAG1").unwrap();
        let reports = run_rule(
            &store,
            &registry,
            rule,
            GroupBy::Team,
            &wildcard(),
            &["charlie".to_string()],
        )
        .await
        .unwrap();
        let charlie = reports.iter().find(|r| r.name == "charlie").unwrap();
        assert!(charlie.rows.is_empty());
        assert_eq!(charlie.percentage, 100);
        assert!(charlie.compliant);
    }
}
