//! Composable aggregation pipeline fragments.
//!
//! Views and rules are assembled by concatenating these fragments into one
//! pipeline: `latest_only -> account_lookup -> security -> view-specific
//! stages`. Fragments are pure functions of their parameters; nothing here
//! touches a collection.

use serde_json::{json, Map, Value};

/// Filter-dropdown field: display name plus the row selector it filters on.
#[derive(Debug, Clone)]
pub struct FilterableField {
    pub name: String,
    pub selector: String,
    /// Hidden fields participate in filtering but not in dropdown output.
    pub hide: bool,
}

impl FilterableField {
    pub fn new(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            hide: false,
        }
    }

    pub fn hidden(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            hide: true,
        }
    }
}

/// Selects only the rows carrying the most recent `(year, month, day)`
/// present in the current result set.
///
/// The date is computed from the same rows being filtered (a `$facet`
/// capturing the maximum, then a match against it), not from a separate
/// lookup, so the fragment can sit inside a larger pipeline without an
/// extra round trip. An empty input yields no rows; callers that must keep
/// empty groups visible in summaries append synthetic entries after
/// aggregation instead.
pub fn latest_only() -> Vec<Value> {
    vec![
        json!({"$facet": {
            "latest": [
                {"$sort": {"year": -1, "month": -1, "day": -1}},
                {"$limit": 1}
            ],
            "current": [{"$match": {}}]
        }}),
        json!({"$unwind": "$current"}),
        json!({"$match": {
            "$expr": {"$and": [
                {"$eq": ["$current.year", {"$arrayElemAt": ["$latest.year", 0]}]},
                {"$eq": ["$current.month", {"$arrayElemAt": ["$latest.month", 0]}]},
                {"$eq": ["$current.day", {"$arrayElemAt": ["$latest.day", 0]}]}
            ]}
        }}),
        json!({"$replaceRoot": {"newRoot": "$current"}}),
    ]
}

/// Enriches each row with `accountDetails` from the `account_details`
/// collection, taking the first match when the lookup is one-to-many and
/// an explicit unknown record when there is none.
pub fn account_lookup() -> Vec<Value> {
    vec![
        json!({"$lookup": {
            "from": "account_details",
            "localField": "account_id",
            "foreignField": "account_id",
            "pipeline": [{"$project": {
                "_id": 0, "account_id": 1, "team": 1, "tenant": 1,
                "environment": 1, "groups": 1
            }}],
            "as": "accountDetailsArr"
        }}),
        json!({"$addFields": {
            "accountDetails": {"$ifNull": [
                {"$arrayElemAt": ["$accountDetailsArr", 0]},
                {
                    "account_id": "unknown",
                    "team": "unknown",
                    "tenant": {"id": "unknown", "name": "unknown", "description": "unknown"},
                    "environment": "unknown",
                    "groups": []
                }
            ]}
        }}),
    ]
}

/// Row-level group filter. The wildcard group admits everything.
pub fn security(groups: &[String]) -> Vec<Value> {
    if groups.iter().any(|g| g == "*") {
        return vec![];
    }
    vec![json!({"$match": {
        "accountDetails.groups": {"$in": groups}
    }})]
}

/// Groups rows by an arbitrary selector path, or into one global group
/// when `None`, collecting the constituent rows per group. Rule pipelines
/// that need reshaped rows emit their own `$group` stages instead.
pub fn grouping(selector: Option<&str>) -> Vec<Value> {
    let id = match selector {
        Some(path) => Value::from(format!("${path}")),
        None => Value::Null,
    };
    vec![json!({"$group": {
        "_id": id,
        "rows": {"$push": "$$ROOT"}
    }})]
}

/// Exact-match filters (AND) plus a free-text search over the declared
/// searchable fields (OR across fields, AND with the exact filters).
pub fn filter_stages(
    filters: &[(String, String)],
    search: Option<&str>,
    searchable_fields: &[String],
) -> Vec<Value> {
    let mut stages = Vec::new();
    if !filters.is_empty() {
        let conditions: Vec<Value> = filters
            .iter()
            .map(|(selector, value)| json!({(selector.as_str()): {"$eq": value}}))
            .collect();
        stages.push(json!({"$match": {"$and": conditions}}));
    }
    if let Some(search) = search {
        let alternatives: Vec<Value> = searchable_fields
            .iter()
            .map(|field| json!({(field.as_str()): {"$regex": search, "$options": "is"}}))
            .collect();
        stages.push(json!({"$match": {"$or": alternatives}}));
    }
    stages
}

/// One `$facet` pass computing the total count, the requested page window
/// and the distinct values of every filterable field, all over the same
/// filtered-but-unpaginated row set so counts and dropdown options agree
/// with what is on screen.
pub fn faceted(page: u64, page_size: u64, filterable_fields: &[FilterableField]) -> Value {
    let skip = page.saturating_sub(1) * page_size;
    let mut unique_group = Map::new();
    unique_group.insert("_id".to_string(), Value::Null);
    for field in filterable_fields.iter().filter(|f| !f.hide) {
        unique_group.insert(
            field.name.clone(),
            json!({"$addToSet": format!("${}", field.selector)}),
        );
    }
    json!({"$facet": {
        "metadata": [{"$count": "total_count"}],
        "resources": [
            {"$skip": skip},
            {"$limit": page_size}
        ],
        "uniqueFields": [{"$group": Value::Object(unique_group)}]
    }})
}

/// Full filter + paginate tail of a details pipeline.
pub fn view_pipeline(
    page: u64,
    page_size: u64,
    filters: &[(String, String)],
    search: Option<&str>,
    filterable_fields: &[FilterableField],
    searchable_fields: &[String],
) -> Vec<Value> {
    let mut stages = filter_stages(filters, search, searchable_fields);
    stages.push(faceted(page, page_size, filterable_fields));
    stages
}

/// Compliance percentage over grouped rows carrying `Count` and
/// `Compliant`: `floor(100 * compliant / total)`, vacuously 100 for an
/// empty group.
pub fn compliance_percentage(rows: &[Value]) -> u32 {
    let mut total: u64 = 0;
    let mut compliant: u64 = 0;
    for row in rows {
        let count = row.get("Count").and_then(Value::as_u64).unwrap_or(0);
        total += count;
        if row.get("Compliant").and_then(Value::as_bool) == Some(true) {
            compliant += count;
        }
    }
    if total == 0 {
        return 100;
    }
    (100 * compliant / total) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionSource, MemoryStore};

    #[tokio::test]
    async fn latest_only_keeps_only_newest_day() {
        let store = MemoryStore::from_seed(json!({
            "tags": [
                {"account_id": "1", "resource_id": "r", "year": 2024, "month": 1, "day": 14},
                {"account_id": "1", "resource_id": "r", "year": 2024, "month": 1, "day": 15}
            ]
        }))
        .unwrap();
        let coll = store.collection("tags").unwrap();
        let rows = coll.aggregate(latest_only()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["day"], json!(15));
    }

    #[tokio::test]
    async fn latest_only_yields_nothing_for_empty_input() {
        let store = MemoryStore::from_seed(json!({"tags": []})).unwrap();
        let coll = store.collection("tags").unwrap();
        let rows = coll.aggregate(latest_only()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn account_lookup_enriches_and_defaults() {
        let store = MemoryStore::from_seed(json!({
            "tags": [
                {"account_id": "111111111111", "resource_id": "r1"},
                {"account_id": "999999999999", "resource_id": "r2"}
            ],
            "account_details": [
                {"account_id": "111111111111", "team": "alpha", "groups": ["alpha"]}
            ]
        }))
        .unwrap();
        let coll = store.collection("tags").unwrap();
        let rows = coll.aggregate(account_lookup()).await.unwrap();
        assert_eq!(rows[0]["accountDetails"]["team"], json!("alpha"));
        assert_eq!(rows[1]["accountDetails"]["team"], json!("unknown"));
    }

    #[test]
    fn security_is_empty_for_wildcard() {
        assert!(security(&["*".to_string()]).is_empty());
        assert_eq!(security(&["alpha".to_string()]).len(), 1);
    }

    #[tokio::test]
    async fn security_admits_only_matching_groups() {
        let store = MemoryStore::from_seed(json!({
            "rows": [
                {"resource_id": "r1", "accountDetails": {"groups": ["alpha"]}},
                {"resource_id": "r2", "accountDetails": {"groups": ["bravo"]}}
            ]
        }))
        .unwrap();
        let coll = store.collection("rows").unwrap();
        let rows = coll.aggregate(security(&["alpha".to_string()])).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["resource_id"], json!("r1"));
    }

    #[tokio::test]
    async fn grouping_buckets_by_selector_or_globally() {
        let store = MemoryStore::from_seed(json!({
            "rows": [
                {"accountDetails": {"team": "alpha"}, "n": 1},
                {"accountDetails": {"team": "alpha"}, "n": 2},
                {"accountDetails": {"team": "bravo"}, "n": 3}
            ]
        }))
        .unwrap();
        let coll = store.collection("rows").unwrap();
        let rows = coll
            .aggregate(grouping(Some("accountDetails.team")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["_id"], json!("alpha"));
        assert_eq!(rows[0]["rows"].as_array().unwrap().len(), 2);

        let global = coll.aggregate(grouping(None)).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0]["rows"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn faceted_counts_pages_and_unique_values() {
        let docs: Vec<Value> = (1..=25)
            .map(|i| json!({"n": i, "kind": if i % 2 == 0 { "even" } else { "odd" }}))
            .collect();
        let store = MemoryStore::from_seed(json!({"rows": docs})).unwrap();
        let coll = store.collection("rows").unwrap();
        let fields = vec![FilterableField::new("Kind", "kind")];
        let rows = coll
            .aggregate(vec![faceted(2, 10, &fields)])
            .await
            .unwrap();
        let result = &rows[0];
        assert_eq!(result["metadata"][0]["total_count"], json!(25));
        let page = result["resources"].as_array().unwrap();
        assert_eq!(page.len(), 10);
        assert_eq!(page[0]["n"], json!(11));
        let unique = result["uniqueFields"][0]["Kind"].as_array().unwrap();
        assert_eq!(unique.len(), 2);
    }

    #[tokio::test]
    async fn filters_and_search_combine() {
        let store = MemoryStore::from_seed(json!({
            "rows": [
                {"kind": "even", "Arn": "arn:aws:s3:::bucket-two"},
                {"kind": "odd", "Arn": "arn:aws:s3:::bucket-one"},
                {"kind": "even", "Arn": "arn:aws:rds:eu-west-1:db-one"}
            ]
        }))
        .unwrap();
        let coll = store.collection("rows").unwrap();
        let stages = filter_stages(
            &[("kind".to_string(), "even".to_string())],
            Some("S3"),
            &["Arn".to_string()],
        );
        let rows = coll.aggregate(stages).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Arn"], json!("arn:aws:s3:::bucket-two"));
    }

    #[test]
    fn compliance_percentage_cases() {
        let full = vec![
            json!({"Count": 10, "Compliant": true}),
            json!({"Count": 0, "Compliant": false}),
        ];
        assert_eq!(compliance_percentage(&full), 100);
        assert_eq!(compliance_percentage(&[]), 100);
        let half = vec![
            json!({"Count": 5, "Compliant": true}),
            json!({"Count": 5, "Compliant": false}),
        ];
        assert_eq!(compliance_percentage(&half), 50);
        let third = vec![
            json!({"Count": 1, "Compliant": true}),
            json!({"Count": 2, "Compliant": false}),
        ];
        assert_eq!(compliance_percentage(&third), 33);
    }
}
