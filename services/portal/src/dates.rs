//! Snapshot date resolution.
//!
//! Snapshots are written once per day per resource; readers observe a
//! consistent day by querying for the most recent `(year, month, day)`
//! present in a collection and filtering to it.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{Collection, CollectionSource, FindOptions, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl SnapshotDate {
    pub fn from_doc(doc: &Value) -> Option<Self> {
        Some(Self {
            year: doc.get("year")?.as_i64()? as i32,
            month: doc.get("month")?.as_u64()? as u32,
            day: doc.get("day")?.as_u64()? as u32,
        })
    }

    /// Filter document selecting exactly this snapshot day.
    pub fn filter(&self) -> Value {
        json!({"year": self.year, "month": self.month, "day": self.day})
    }
}

fn date_projection() -> Value {
    json!({"year": 1, "month": 1, "day": 1})
}

/// Finds the most recent snapshot date, checking only the current and
/// previous calendar month relative to `today`.
///
/// This bounds the query cost on large collections instead of running a
/// full descending-sort scan. The trade-off is deliberate: a collection
/// last updated more than one month ago resolves to `None`, not to its
/// true latest date.
pub async fn latest_date(
    collection: &dyn Collection,
    today: NaiveDate,
) -> Result<Option<SnapshotDate>, StoreError> {
    let year = today.year();
    let month = today.month();

    let current = collection
        .find_one(
            json!({"year": year, "month": month}),
            FindOptions::sorted(json!({"day": -1})).with_projection(date_projection()),
        )
        .await?;
    if let Some(doc) = current {
        return Ok(SnapshotDate::from_doc(&doc));
    }

    // December to January rollover when stepping back a month.
    let (prev_year, prev_month) = if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    };
    let previous = collection
        .find_one(
            json!({"year": prev_year, "month": prev_month}),
            FindOptions::sorted(json!({"day": -1})).with_projection(date_projection()),
        )
        .await?;
    Ok(previous.as_ref().and_then(SnapshotDate::from_doc))
}

/// The maximum snapshot date found across several collections. A failing
/// collection contributes no candidate date instead of failing the whole
/// operation.
pub async fn latest_date_across(
    source: &dyn CollectionSource,
    names: &[&str],
    today: NaiveDate,
) -> Option<SnapshotDate> {
    let mut latest: Option<SnapshotDate> = None;
    for name in names {
        let candidate = match source.collection(name) {
            Ok(collection) => match latest_date(collection.as_ref(), today).await {
                Ok(date) => date,
                Err(err) => {
                    warn!(collection = name, error = %err, "latest-date lookup failed");
                    None
                }
            },
            Err(err) => {
                warn!(collection = name, error = %err, "latest-date lookup failed");
                None
            }
        };
        if let Some(date) = candidate {
            if latest.map_or(true, |current| date > current) {
                latest = Some(date);
            }
        }
    }
    latest
}

/// Full-scan variant: one `find_one` sorted descending on the date fields.
/// Correct for arbitrarily stale collections; callers accept the cost.
pub async fn latest_date_full_scan(
    collection: &dyn Collection,
) -> Result<Option<SnapshotDate>, StoreError> {
    let doc = collection
        .find_one(
            json!({}),
            FindOptions::sorted(json!({"year": -1, "month": -1, "day": -1}))
                .with_projection(date_projection()),
        )
        .await?;
    Ok(doc.as_ref().and_then(SnapshotDate::from_doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn source() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "tags": [
                {"year": 2024, "month": 1, "day": 14, "resource_id": "a"},
                {"year": 2024, "month": 1, "day": 15, "resource_id": "a"},
                {"year": 2023, "month": 12, "day": 30, "resource_id": "a"}
            ],
            "rds": [
                {"year": 2023, "month": 12, "day": 28}
            ],
            "stale": [
                {"year": 2022, "month": 6, "day": 1}
            ],
            "empty": []
        }))
        .unwrap()
    }

    fn jan_2024() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
    }

    #[tokio::test]
    async fn picks_max_day_in_current_month() {
        let store = source();
        let coll = store.collection("tags").unwrap();
        let date = latest_date(coll.as_ref(), jan_2024()).await.unwrap();
        assert_eq!(
            date,
            Some(SnapshotDate { year: 2024, month: 1, day: 15 })
        );
    }

    #[tokio::test]
    async fn falls_back_to_previous_month_with_rollover() {
        let store = source();
        let coll = store.collection("rds").unwrap();
        let date = latest_date(coll.as_ref(), jan_2024()).await.unwrap();
        assert_eq!(
            date,
            Some(SnapshotDate { year: 2023, month: 12, day: 28 })
        );
    }

    #[tokio::test]
    async fn stale_collection_resolves_to_none() {
        // Deliberate limitation: anything older than the previous month is
        // invisible to the bounded lookup.
        let store = source();
        let coll = store.collection("stale").unwrap();
        assert_eq!(latest_date(coll.as_ref(), jan_2024()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn across_collections_takes_max_and_skips_failures() {
        let store = source();
        let date = latest_date_across(
            &store,
            &["tags", "rds", "empty", "no_such_collection"],
            jan_2024(),
        )
        .await;
        assert_eq!(
            date,
            Some(SnapshotDate { year: 2024, month: 1, day: 15 })
        );
    }

    #[tokio::test]
    async fn full_scan_sees_stale_data() {
        let store = source();
        let coll = store.collection("stale").unwrap();
        let date = latest_date_full_scan(coll.as_ref()).await.unwrap();
        assert_eq!(
            date,
            Some(SnapshotDate { year: 2022, month: 6, day: 1 })
        );
    }

    #[test]
    fn dates_order_as_tuples() {
        let a = SnapshotDate { year: 2024, month: 1, day: 15 };
        let b = SnapshotDate { year: 2023, month: 12, day: 31 };
        assert!(a > b);
    }
}
