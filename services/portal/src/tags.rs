//! Mandatory-tag evaluation.
//!
//! Snapshot documents carry tags in two shapes: a free-form key/value map
//! or an array of `{Key, Value}` pairs. Both are normalized into a
//! lowercase-keyed map before any compliance check, so the same evaluation
//! runs on the dashboard, the per-team aggregation and the drill-down.

use std::collections::HashMap;

use serde_json::Value;

/// Composite tag: satisfied by `BillingID` plus one of `Service`/`Project`.
pub const BSP: &str = "BSP";

/// Normalizes a document's `Tags` field into a lowercase-keyed map.
/// Handles both the map form and the array-of-`{Key, Value}` form; any
/// other shape yields an empty map.
pub fn normalize_tags(doc: &Value) -> HashMap<String, Value> {
    let mut tags = HashMap::new();
    match doc.get("Tags") {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                tags.insert(key.to_lowercase(), value.clone());
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let Some(key) = item.get("Key").and_then(Value::as_str) else {
                    continue;
                };
                let Some(value) = item.get("Value") else {
                    continue;
                };
                tags.insert(key.to_lowercase(), value.clone());
            }
        }
        _ => {}
    }
    tags
}

/// A tag value is missing when absent, null, or blank after trimming.
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Whether one mandatory tag is missing from a normalized tag map.
pub fn tag_missing(tags: &HashMap<String, Value>, name: &str) -> bool {
    if name == BSP {
        let has_billing_id = !is_missing(tags.get("billingid"));
        let has_service = !is_missing(tags.get("service"));
        let has_project = !is_missing(tags.get("project"));
        return !(has_billing_id && (has_service || has_project));
    }
    is_missing(tags.get(&name.to_lowercase()))
}

/// The subset of `mandatory` missing from the document's tags.
pub fn missing_mandatory_tags(tags: &HashMap<String, Value>, mandatory: &[String]) -> Vec<String> {
    mandatory
        .iter()
        .filter(|name| tag_missing(tags, name))
        .cloned()
        .collect()
}

/// Buckets whose name segment begins with a 12-digit prefix are
/// auto-generated and unmanageable; they are excluded from tagging
/// evaluation entirely, before any de-duplication accounting.
pub fn is_excluded_bucket(doc: &Value) -> bool {
    if doc.get("resource_type").and_then(Value::as_str) != Some("bucket") {
        return false;
    }
    let Some(resource_id) = doc.get("resource_id").and_then(Value::as_str) else {
        return false;
    };
    let bucket_name = resource_id.split(":::").nth(1).unwrap_or("");
    bucket_name.len() >= 12 && bucket_name.chars().take(12).all(|c| c.is_ascii_digit())
}
