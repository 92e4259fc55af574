//! In-process cursor aggregation.
//!
//! Summary pages fan out over whole snapshot collections, so they stream
//! documents through `find` cursors and accumulate per-group statistics in
//! memory instead of pushing everything through aggregation pipelines.
//! Results are bucketed by team or tenant via the account directory.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::accounts::{AccountDetails, AccountDirectory, DirectoryCounts};
use crate::config::{Config, DeprecatedVersion};
use crate::dates::{self, SnapshotDate};
use crate::store::{Collection, CollectionSource, FindOptions, StoreError};
use crate::tags;

/// Dimension the summary statistics are bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDimension {
    Team,
    Tenant,
}

/// Group keys and display names a document's account contributes to.
/// Teams are keyed by name; tenants by id with the name for display.
fn group_entries(dimension: GroupDimension, details: &AccountDetails) -> Vec<(String, String)> {
    match dimension {
        GroupDimension::Team => details
            .teams
            .iter()
            .filter(|team| !team.is_empty())
            .map(|team| (team.clone(), team.clone()))
            .collect(),
        GroupDimension::Tenant => details
            .tenants
            .iter()
            .filter(|tenant| !tenant.id.is_empty())
            .map(|tenant| {
                let display = if tenant.name.is_empty() {
                    tenant.id.clone()
                } else {
                    tenant.name.clone()
                };
                (tenant.id.clone(), display)
            })
            .collect(),
    }
}

/// Per-group statistics with the group's display name attached.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStats<T> {
    pub display_name: String,
    #[serde(flatten)]
    pub stats: T,
}

struct Accumulator<T> {
    groups: BTreeMap<String, GroupStats<T>>,
}

impl<T: Default> Accumulator<T> {
    fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }

    fn entry(&mut self, key: &str, display: &str) -> &mut T {
        &mut self
            .groups
            .entry(key.to_string())
            .or_insert_with(|| GroupStats {
                display_name: display.to_string(),
                stats: T::default(),
            })
            .stats
    }

    fn into_map(self) -> BTreeMap<String, GroupStats<T>> {
        self.groups
    }
}

/// Resolves a collection, treating an unknown name as absent rather than
/// an error. Snapshot collections appear as their collectors first run.
pub(crate) fn optional_collection(
    source: &dyn CollectionSource,
    name: &str,
) -> Result<Option<Arc<dyn Collection>>, StoreError> {
    match source.collection(name) {
        Ok(collection) => Ok(Some(collection)),
        Err(StoreError::UnknownCollection(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// The latest snapshot date of a collection, or `None` when the collection
/// is absent, empty, or fails to answer.
pub async fn latest_snapshot(source: &dyn CollectionSource, name: &str) -> Option<SnapshotDate> {
    let collection = match optional_collection(source, name) {
        Ok(collection) => collection?,
        Err(err) => {
            warn!(collection = name, error = %err, "snapshot date lookup failed");
            return None;
        }
    };
    match dates::latest_date_full_scan(collection.as_ref()).await {
        Ok(date) => date,
        Err(err) => {
            warn!(collection = name, error = %err, "snapshot date lookup failed");
            None
        }
    }
}

/// Looks up a field either under the collector's `Configuration` envelope
/// or at the document root. Older snapshots predate the envelope.
fn config_field<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    doc.pointer(&format!("/Configuration/{name}"))
        .or_else(|| doc.get(name))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggingStats {
    pub total_resources: u64,
    pub non_compliant_resources: u64,
    pub missing_by_tag: BTreeMap<String, u64>,
}

/// Streams the tag snapshot for one day and accumulates compliance per
/// group. Auto-generated buckets are skipped before de-duplication, and a
/// resource counts at most once per group even when several mapping rows
/// put its account in that group.
pub async fn tagging_by_group(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    date: SnapshotDate,
    mandatory: &[String],
) -> Result<BTreeMap<String, GroupStats<TaggingStats>>, StoreError> {
    let collection = source.collection("tags")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;

    let mut resolver = directory.cached();
    let mut acc: Accumulator<TaggingStats> = Accumulator::new();
    let mut seen: HashMap<String, HashSet<(String, String)>> = HashMap::new();

    while let Some(doc) = cursor.try_next().await? {
        if tags::is_excluded_bucket(&doc) {
            continue;
        }
        let account_id = doc
            .get("account_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let resource_id = doc
            .get("resource_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let details = resolver.resolve(&account_id).clone();
        let tag_map = tags::normalize_tags(&doc);
        let missing = tags::missing_mandatory_tags(&tag_map, mandatory);

        for (key, display) in group_entries(dimension, &details) {
            let unique = (account_id.clone(), resource_id.clone());
            if !seen.entry(key.clone()).or_default().insert(unique) {
                continue;
            }
            let stats = acc.entry(&key, &display);
            stats.total_resources += 1;
            if !missing.is_empty() {
                stats.non_compliant_resources += 1;
            }
            for tag in &missing {
                *stats.missing_by_tag.entry(tag.clone()).or_insert(0) += 1;
            }
        }
    }
    Ok(acc.into_map())
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_databases: u64,
    pub deprecated_databases: u64,
}

pub(crate) fn is_deprecated_engine(
    doc: &Value,
    deprecated: &HashMap<String, Vec<DeprecatedVersion>>,
) -> bool {
    let engine = config_field(doc, "Engine")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let version = config_field(doc, "EngineVersion")
        .and_then(Value::as_str)
        .unwrap_or("");
    deprecated.get(engine).is_some_and(|entries| {
        entries
            .iter()
            .any(|entry| version.starts_with(&entry.version) || version.contains(&entry.version))
    })
}

/// RDS instances plus Redshift clusters. Deprecation checks apply to RDS
/// engine versions only; Redshift rows count toward totals.
pub async fn database_by_group(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    date: SnapshotDate,
    deprecated: &HashMap<String, Vec<DeprecatedVersion>>,
) -> Result<BTreeMap<String, GroupStats<DatabaseStats>>, StoreError> {
    let mut resolver = directory.cached();
    let mut acc: Accumulator<DatabaseStats> = Accumulator::new();

    if let Some(collection) = optional_collection(source, "rds")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
            let details = resolver.resolve(account_id).clone();
            let deprecated_row = is_deprecated_engine(&doc, deprecated);
            for (key, display) in group_entries(dimension, &details) {
                let stats = acc.entry(&key, &display);
                stats.total_databases += 1;
                if deprecated_row {
                    stats.deprecated_databases += 1;
                }
            }
        }
    }

    if let Some(collection) = optional_collection(source, "redshift_clusters")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
            let details = resolver.resolve(account_id).clone();
            for (key, display) in group_entries(dimension, &details) {
                acc.entry(&key, &display).total_databases += 1;
            }
        }
    }

    Ok(acc.into_map())
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStats {
    pub total_load_balancers: u64,
    pub alb_count: u64,
    pub nlb_count: u64,
    pub classic_count: u64,
    pub secure_load_balancers: u64,
}

fn classic_has_secure_listener(doc: &Value) -> bool {
    doc.get("ListenerDescriptions")
        .and_then(Value::as_array)
        .is_some_and(|descriptions| {
            descriptions.iter().any(|desc| {
                matches!(
                    desc.pointer("/Listener/Protocol").and_then(Value::as_str),
                    Some("HTTPS") | Some("SSL")
                )
            })
        })
}

/// ALB/NLB plus classic load balancers. A v2 load balancer is secure when
/// any of its listeners (a separate collection, joined on the ARN) speaks
/// HTTPS or TLS; a classic one when any listener description does.
pub async fn loadbalancers_by_group(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    date: SnapshotDate,
) -> Result<BTreeMap<String, GroupStats<LoadBalancerStats>>, StoreError> {
    let mut resolver = directory.cached();
    let mut acc: Accumulator<LoadBalancerStats> = Accumulator::new();

    let secure_arns = secure_listener_arns(source, date).await?;

    if let Some(collection) = optional_collection(source, "elb_v2")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
            let details = resolver.resolve(account_id).clone();
            let lb_type = config_field(&doc, "Type").and_then(Value::as_str).unwrap_or("unknown");
            let secure = config_field(&doc, "LoadBalancerArn")
                .and_then(Value::as_str)
                .is_some_and(|arn| secure_arns.contains(arn));
            for (key, display) in group_entries(dimension, &details) {
                let stats = acc.entry(&key, &display);
                stats.total_load_balancers += 1;
                match lb_type {
                    "application" => stats.alb_count += 1,
                    "network" => stats.nlb_count += 1,
                    _ => {}
                }
                if secure {
                    stats.secure_load_balancers += 1;
                }
            }
        }
    }

    if let Some(collection) = optional_collection(source, "elb_classic")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
            let details = resolver.resolve(account_id).clone();
            let secure = classic_has_secure_listener(&doc);
            for (key, display) in group_entries(dimension, &details) {
                let stats = acc.entry(&key, &display);
                stats.total_load_balancers += 1;
                stats.classic_count += 1;
                if secure {
                    stats.secure_load_balancers += 1;
                }
            }
        }
    }

    Ok(acc.into_map())
}

/// ARNs of v2 load balancers with at least one HTTPS/TLS listener on the
/// given day.
async fn secure_listener_arns(
    source: &dyn CollectionSource,
    date: SnapshotDate,
) -> Result<HashSet<String>, StoreError> {
    let mut arns = HashSet::new();
    if let Some(collection) = optional_collection(source, "elb_v2_listeners")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let protocol = config_field(&doc, "Protocol").and_then(Value::as_str);
            if matches!(protocol, Some("HTTPS") | Some("TLS")) {
                if let Some(arn) = config_field(&doc, "LoadBalancerArn").and_then(Value::as_str) {
                    arns.insert(arn.to_string());
                }
            }
        }
    }
    Ok(arns)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsStats {
    pub total_keys: u64,
    pub keys_with_rotation: u64,
}

pub async fn kms_by_group(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    date: SnapshotDate,
) -> Result<BTreeMap<String, GroupStats<KmsStats>>, StoreError> {
    let collection = source.collection("kms_key_metadata")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut acc: Accumulator<KmsStats> = Accumulator::new();

    while let Some(doc) = cursor.try_next().await? {
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        let details = resolver.resolve(account_id).clone();
        let rotation = config_field(&doc, "KeyRotationEnabled") == Some(&Value::Bool(true));
        for (key, display) in group_entries(dimension, &details) {
            let stats = acc.entry(&key, &display);
            stats.total_keys += 1;
            if rotation {
                stats.keys_with_rotation += 1;
            }
        }
    }
    Ok(acc.into_map())
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingStats {
    pub total_groups: u64,
    pub empty_groups: u64,
}

fn autoscaling_is_empty(doc: &Value) -> bool {
    config_field(doc, "Instances")
        .and_then(Value::as_array)
        .map_or(true, Vec::is_empty)
}

pub async fn autoscaling_by_group(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    date: SnapshotDate,
) -> Result<BTreeMap<String, GroupStats<AutoscalingStats>>, StoreError> {
    let collection = source.collection("autoscaling_groups")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut acc: Accumulator<AutoscalingStats> = Accumulator::new();

    while let Some(doc) = cursor.try_next().await? {
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        let details = resolver.resolve(account_id).clone();
        let empty = autoscaling_is_empty(&doc);
        for (key, display) in group_entries(dimension, &details) {
            let stats = acc.entry(&key, &display);
            stats.total_groups += 1;
            if empty {
                stats.empty_groups += 1;
            }
        }
    }
    Ok(acc.into_map())
}

fn rate(part: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((part as f64 / total as f64 * 1000.0).round() / 10.0)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggingSummary {
    pub total_resources: u64,
    pub non_compliant_resources: u64,
    pub compliance_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub total_databases: u64,
    pub deprecated_databases: u64,
    pub current_versions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSummary {
    pub total_load_balancers: u64,
    pub secure_load_balancers: u64,
    pub alb_count: u64,
    pub nlb_count: u64,
    pub classic_count: u64,
    pub secure_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsSummary {
    pub total_keys: u64,
    pub keys_with_rotation: u64,
    pub rotation_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSummary {
    pub total_groups: u64,
    pub empty_groups: u64,
    pub active_groups: u64,
}

/// One group's row in the cross-policy summary table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub name: String,
    pub display_name: String,
    pub tagging: TaggingSummary,
    pub database: DatabaseSummary,
    pub loadbalancers: LoadBalancerSummary,
    pub kms: KmsSummary,
    pub autoscaling: AutoscalingSummary,
}

/// Joins all five policy aggregations into one row per group.
///
/// Each policy reads at its own collection's latest snapshot date, so one
/// stale collector does not hold the whole summary back. The five
/// aggregations run concurrently; groups present in any of them get a row,
/// with zeroed sections where a policy saw nothing. Rows come back sorted
/// by group key.
pub async fn group_summary(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    dimension: GroupDimension,
    config: &Config,
) -> Result<Vec<GroupSummary>, StoreError> {
    let mandatory = config.mandatory_tags();
    let deprecated = config.deprecated_versions();

    let tags_date = latest_snapshot(source, "tags").await;
    let rds_date = latest_snapshot(source, "rds").await;
    let elb_date = latest_snapshot(source, "elb_v2").await;
    let kms_date = latest_snapshot(source, "kms_key_metadata").await;
    let asg_date = latest_snapshot(source, "autoscaling_groups").await;

    let tagging_fut = async {
        match tags_date {
            Some(date) => tagging_by_group(source, directory, dimension, date, &mandatory).await,
            None => Ok(BTreeMap::new()),
        }
    };
    let database_fut = async {
        match rds_date {
            Some(date) => database_by_group(source, directory, dimension, date, &deprecated).await,
            None => Ok(BTreeMap::new()),
        }
    };
    let lb_fut = async {
        match elb_date {
            Some(date) => loadbalancers_by_group(source, directory, dimension, date).await,
            None => Ok(BTreeMap::new()),
        }
    };
    let kms_fut = async {
        match kms_date {
            Some(date) => kms_by_group(source, directory, dimension, date).await,
            None => Ok(BTreeMap::new()),
        }
    };
    let asg_fut = async {
        match asg_date {
            Some(date) => autoscaling_by_group(source, directory, dimension, date).await,
            None => Ok(BTreeMap::new()),
        }
    };

    let (tagging, database, loadbalancers, kms, autoscaling) =
        tokio::try_join!(tagging_fut, database_fut, lb_fut, kms_fut, asg_fut)?;

    let mut names: BTreeSet<&String> = BTreeSet::new();
    names.extend(tagging.keys());
    names.extend(database.keys());
    names.extend(loadbalancers.keys());
    names.extend(kms.keys());
    names.extend(autoscaling.keys());

    let display_of = |name: &String| -> String {
        tagging
            .get(name)
            .map(|g| g.display_name.clone())
            .or_else(|| database.get(name).map(|g| g.display_name.clone()))
            .or_else(|| loadbalancers.get(name).map(|g| g.display_name.clone()))
            .or_else(|| kms.get(name).map(|g| g.display_name.clone()))
            .or_else(|| autoscaling.get(name).map(|g| g.display_name.clone()))
            .unwrap_or_else(|| name.clone())
    };

    let summaries = names
        .into_iter()
        .map(|name| {
            let display_name = display_of(name);
            let t = tagging.get(name).map(|g| g.stats.clone()).unwrap_or_default();
            let d = database.get(name).map(|g| g.stats.clone()).unwrap_or_default();
            let l = loadbalancers.get(name).map(|g| g.stats.clone()).unwrap_or_default();
            let k = kms.get(name).map(|g| g.stats.clone()).unwrap_or_default();
            let a = autoscaling.get(name).map(|g| g.stats.clone()).unwrap_or_default();
            GroupSummary {
                name: name.clone(),
                display_name,
                tagging: TaggingSummary {
                    total_resources: t.total_resources,
                    non_compliant_resources: t.non_compliant_resources,
                    compliance_rate: rate(
                        t.total_resources - t.non_compliant_resources,
                        t.total_resources,
                    ),
                },
                database: DatabaseSummary {
                    total_databases: d.total_databases,
                    deprecated_databases: d.deprecated_databases,
                    current_versions: d.total_databases - d.deprecated_databases,
                },
                loadbalancers: LoadBalancerSummary {
                    total_load_balancers: l.total_load_balancers,
                    secure_load_balancers: l.secure_load_balancers,
                    alb_count: l.alb_count,
                    nlb_count: l.nlb_count,
                    classic_count: l.classic_count,
                    secure_rate: rate(l.secure_load_balancers, l.total_load_balancers),
                },
                kms: KmsSummary {
                    total_keys: k.total_keys,
                    keys_with_rotation: k.keys_with_rotation,
                    rotation_rate: rate(k.keys_with_rotation, k.total_keys),
                },
                autoscaling: AutoscalingSummary {
                    total_groups: a.total_groups,
                    empty_groups: a.empty_groups,
                    active_groups: a.total_groups - a.empty_groups,
                },
            }
        })
        .collect();
    Ok(summaries)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeOverview {
    pub name: String,
    pub teams_non_compliant: usize,
    pub tenants_non_compliant: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub counts: DirectoryCounts,
    pub resource_types: Vec<ResourceTypeOverview>,
}

#[derive(Default)]
struct NonCompliantSets {
    teams: HashSet<String>,
    tenants: HashSet<String>,
}

impl NonCompliantSets {
    fn mark(&mut self, details: &AccountDetails) {
        for team in &details.teams {
            if !team.is_empty() {
                self.teams.insert(team.clone());
            }
        }
        for tenant in &details.tenants {
            if !tenant.id.is_empty() {
                self.tenants.insert(tenant.id.clone());
            }
        }
    }
}

/// Landing-page overview: directory entity counts plus, per enabled policy,
/// how many teams and tenants own at least one non-compliant resource.
pub async fn overview(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    config: &Config,
) -> Result<Overview, StoreError> {
    let mandatory = config.mandatory_tags();
    let deprecated = config.deprecated_versions();

    struct Policy {
        name: &'static str,
        flag: &'static str,
        collection: &'static str,
    }
    let policies = [
        Policy { name: "Tagging", flag: "features.compliance.policies.tagging", collection: "tags" },
        Policy { name: "Database", flag: "features.compliance.policies.database", collection: "rds" },
        Policy { name: "Load Balancers", flag: "features.compliance.policies.loadbalancers", collection: "elb_v2" },
        Policy { name: "KMS Keys", flag: "features.compliance.policies.kms", collection: "kms_key_metadata" },
        Policy { name: "Auto Scaling", flag: "features.compliance.policies.autoscaling", collection: "autoscaling_groups" },
    ];

    let mut resource_types = Vec::new();
    for policy in policies {
        if !config.get_bool(policy.flag, false) {
            continue;
        }
        let sets = match latest_snapshot(source, policy.collection).await {
            Some(date) => match policy.collection {
                "tags" => tagging_non_compliant(source, directory, date, &mandatory).await?,
                "rds" => database_non_compliant(source, directory, date, &deprecated).await?,
                "elb_v2" => loadbalancer_non_compliant(source, directory, date).await?,
                "kms_key_metadata" => kms_non_compliant(source, directory, date).await?,
                _ => autoscaling_non_compliant(source, directory, date).await?,
            },
            None => NonCompliantSets::default(),
        };
        resource_types.push(ResourceTypeOverview {
            name: policy.name.to_string(),
            teams_non_compliant: sets.teams.len(),
            tenants_non_compliant: sets.tenants.len(),
        });
    }

    Ok(Overview {
        counts: directory.counts(),
        resource_types,
    })
}

async fn tagging_non_compliant(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    date: SnapshotDate,
    mandatory: &[String],
) -> Result<NonCompliantSets, StoreError> {
    let collection = source.collection("tags")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut sets = NonCompliantSets::default();
    while let Some(doc) = cursor.try_next().await? {
        if tags::is_excluded_bucket(&doc) {
            continue;
        }
        let tag_map = tags::normalize_tags(&doc);
        if tags::missing_mandatory_tags(&tag_map, mandatory).is_empty() {
            continue;
        }
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        sets.mark(&resolver.resolve(account_id).clone());
    }
    Ok(sets)
}

async fn database_non_compliant(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    date: SnapshotDate,
    deprecated: &HashMap<String, Vec<DeprecatedVersion>>,
) -> Result<NonCompliantSets, StoreError> {
    let collection = source.collection("rds")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut sets = NonCompliantSets::default();
    while let Some(doc) = cursor.try_next().await? {
        if !is_deprecated_engine(&doc, deprecated) {
            continue;
        }
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        sets.mark(&resolver.resolve(account_id).clone());
    }
    Ok(sets)
}

async fn loadbalancer_non_compliant(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    date: SnapshotDate,
) -> Result<NonCompliantSets, StoreError> {
    let mut resolver = directory.cached();
    let mut sets = NonCompliantSets::default();
    let secure_arns = secure_listener_arns(source, date).await?;

    let collection = source.collection("elb_v2")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    while let Some(doc) = cursor.try_next().await? {
        let secure = config_field(&doc, "LoadBalancerArn")
            .and_then(Value::as_str)
            .is_some_and(|arn| secure_arns.contains(arn));
        if secure {
            continue;
        }
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        sets.mark(&resolver.resolve(account_id).clone());
    }

    if let Some(collection) = optional_collection(source, "elb_classic")? {
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            if classic_has_secure_listener(&doc) {
                continue;
            }
            let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
            sets.mark(&resolver.resolve(account_id).clone());
        }
    }
    Ok(sets)
}

async fn kms_non_compliant(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    date: SnapshotDate,
) -> Result<NonCompliantSets, StoreError> {
    let collection = source.collection("kms_key_metadata")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut sets = NonCompliantSets::default();
    while let Some(doc) = cursor.try_next().await? {
        if config_field(&doc, "KeyRotationEnabled") == Some(&Value::Bool(true)) {
            continue;
        }
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        sets.mark(&resolver.resolve(account_id).clone());
    }
    Ok(sets)
}

async fn autoscaling_non_compliant(
    source: &dyn CollectionSource,
    directory: &AccountDirectory,
    date: SnapshotDate,
) -> Result<NonCompliantSets, StoreError> {
    let collection = source.collection("autoscaling_groups")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut resolver = directory.cached();
    let mut sets = NonCompliantSets::default();
    while let Some(doc) = cursor.try_next().await? {
        if !autoscaling_is_empty(&doc) {
            continue;
        }
        let account_id = doc.get("account_id").and_then(Value::as_str).unwrap_or("");
        sets.mark(&resolver.resolve(account_id).clone());
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountMapping, Tenant};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn directory() -> AccountDirectory {
        AccountDirectory::new(vec![
            AccountMapping {
                account_id: "111111111111".to_string(),
                team: "alpha".to_string(),
                environments: vec![],
                tenant: Some(Tenant {
                    id: "t1".to_string(),
                    name: "Tenant One".to_string(),
                    description: String::new(),
                }),
            },
            AccountMapping {
                account_id: "111111111111".to_string(),
                team: "bravo".to_string(),
                environments: vec![],
                tenant: Some(Tenant {
                    id: "t1".to_string(),
                    name: "Tenant One".to_string(),
                    description: String::new(),
                }),
            },
            AccountMapping {
                account_id: "222222222222".to_string(),
                team: "bravo".to_string(),
                environments: vec![],
                tenant: None,
            },
        ])
    }

    fn day() -> SnapshotDate {
        SnapshotDate { year: 2024, month: 1, day: 15 }
    }

    fn mandatory() -> Vec<String> {
        vec!["Source".to_string(), "BSP".to_string()]
    }

    fn store() -> MemoryStore {
        MemoryStore::from_seed(json!({
            "tags": [
                {
                    "account_id": "111111111111", "resource_id": "arn:aws:ec2:::i-1",
                    "resource_type": "instance", "year": 2024, "month": 1, "day": 15,
                    "Tags": [
                        {"Key": "Source", "Value": "terraform"},
                        {"Key": "BillingID", "Value": "B1"},
                        {"Key": "Service", "Value": "S1"}
                    ]
                },
                {
                    "account_id": "222222222222", "resource_id": "arn:aws:ec2:::i-2",
                    "resource_type": "instance", "year": 2024, "month": 1, "day": 15,
                    "Tags": []
                },
                {
                    "account_id": "222222222222", "resource_id": "arn:aws:s3:::123456789012-logs",
                    "resource_type": "bucket", "year": 2024, "month": 1, "day": 15,
                    "Tags": []
                }
            ],
            "rds": [
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Engine": "mysql", "EngineVersion": "5.7.44"},
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Engine": "mysql", "EngineVersion": "8.0.36"}
            ],
            "redshift_clusters": [
                {"account_id": "222222222222", "year": 2024, "month": 1, "day": 15}
            ],
            "elb_v2": [
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Type": "application", "LoadBalancerArn": "arn:lb/secure"},
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Type": "network", "LoadBalancerArn": "arn:lb/plain"}
            ],
            "elb_v2_listeners": [
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Protocol": "HTTPS", "LoadBalancerArn": "arn:lb/secure"},
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Protocol": "HTTP", "LoadBalancerArn": "arn:lb/plain"}
            ],
            "elb_classic": [
                {"account_id": "222222222222", "year": 2024, "month": 1, "day": 15,
                 "ListenerDescriptions": [{"Listener": {"Protocol": "SSL"}}]}
            ],
            "kms_key_metadata": [
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Configuration": {"KeyRotationEnabled": true}},
                {"account_id": "222222222222", "year": 2024, "month": 1, "day": 15,
                 "KeyRotationEnabled": false}
            ],
            "autoscaling_groups": [
                {"account_id": "111111111111", "year": 2024, "month": 1, "day": 15,
                 "Instances": [{"InstanceId": "i-1"}]},
                {"account_id": "222222222222", "year": 2024, "month": 1, "day": 15,
                 "Instances": []}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn tagging_counts_resources_once_per_group_and_skips_buckets() {
        let store = store();
        let stats = tagging_by_group(&store, &directory(), GroupDimension::Team, day(), &mandatory())
            .await
            .unwrap();
        let alpha = &stats["alpha"];
        assert_eq!(alpha.stats.total_resources, 1);
        assert_eq!(alpha.stats.non_compliant_resources, 0);
        // bravo owns both accounts; the numeric-prefixed bucket is excluded.
        let bravo = &stats["bravo"];
        assert_eq!(bravo.stats.total_resources, 2);
        assert_eq!(bravo.stats.non_compliant_resources, 1);
        assert_eq!(bravo.stats.missing_by_tag["Source"], 1);
        assert_eq!(bravo.stats.missing_by_tag["BSP"], 1);
    }

    #[tokio::test]
    async fn tagging_by_tenant_uses_tenant_ids() {
        let store = store();
        let stats =
            tagging_by_group(&store, &directory(), GroupDimension::Tenant, day(), &mandatory())
                .await
                .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats["t1"].display_name, "Tenant One");
        assert_eq!(stats["t1"].stats.total_resources, 1);
    }

    #[tokio::test]
    async fn database_flags_deprecated_rds_versions() {
        let store = store();
        let mut deprecated = HashMap::new();
        deprecated.insert(
            "mysql".to_string(),
            vec![DeprecatedVersion {
                version: "5.7".to_string(),
                message: String::new(),
            }],
        );
        let stats =
            database_by_group(&store, &directory(), GroupDimension::Team, day(), &deprecated)
                .await
                .unwrap();
        assert_eq!(stats["alpha"].stats.total_databases, 2);
        assert_eq!(stats["alpha"].stats.deprecated_databases, 1);
        // Redshift cluster counts for bravo but is never deprecated.
        assert_eq!(stats["bravo"].stats.total_databases, 3);
        assert_eq!(stats["bravo"].stats.deprecated_databases, 1);
    }

    #[tokio::test]
    async fn loadbalancers_detect_secure_listeners() {
        let store = store();
        let stats = loadbalancers_by_group(&store, &directory(), GroupDimension::Team, day())
            .await
            .unwrap();
        let alpha = &stats["alpha"].stats;
        assert_eq!(alpha.total_load_balancers, 2);
        assert_eq!(alpha.alb_count, 1);
        assert_eq!(alpha.nlb_count, 1);
        assert_eq!(alpha.secure_load_balancers, 1);
        // bravo additionally owns the classic balancer with an SSL listener.
        let bravo = &stats["bravo"].stats;
        assert_eq!(bravo.total_load_balancers, 3);
        assert_eq!(bravo.classic_count, 1);
        assert_eq!(bravo.secure_load_balancers, 2);
    }

    #[tokio::test]
    async fn kms_reads_rotation_from_either_shape() {
        let store = store();
        let stats = kms_by_group(&store, &directory(), GroupDimension::Team, day())
            .await
            .unwrap();
        assert_eq!(stats["alpha"].stats.total_keys, 1);
        assert_eq!(stats["alpha"].stats.keys_with_rotation, 1);
        assert_eq!(stats["bravo"].stats.total_keys, 2);
        assert_eq!(stats["bravo"].stats.keys_with_rotation, 1);
    }

    #[tokio::test]
    async fn group_summary_joins_all_policies() {
        let store = store();
        let config = Config::from_value(json!({
            "compliance": {"tagging": {"mandatory_tags": ["Source", "BSP"]}}
        }));
        let summaries = group_summary(&store, &directory(), GroupDimension::Team, &config)
            .await
            .unwrap();
        let names: Vec<_> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo"]);
        let bravo = summaries.iter().find(|s| s.name == "bravo").unwrap();
        assert_eq!(bravo.tagging.total_resources, 2);
        assert_eq!(bravo.tagging.compliance_rate, Some(50.0));
        assert_eq!(bravo.autoscaling.empty_groups, 1);
        assert_eq!(bravo.autoscaling.active_groups, 1);
        assert_eq!(bravo.kms.rotation_rate, Some(50.0));
    }

    #[tokio::test]
    async fn overview_respects_feature_flags() {
        let store = store();
        let config = Config::from_value(json!({
            "features": {"compliance": {"policies": {"tagging": true, "kms": true}}},
            "compliance": {"tagging": {"mandatory_tags": ["Source", "BSP"]}}
        }));
        let result = overview(&store, &directory(), &config).await.unwrap();
        assert_eq!(result.counts.accounts, 2);
        assert_eq!(result.counts.teams, 2);
        assert_eq!(result.counts.tenants, 1);
        let names: Vec<_> = result.resource_types.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Tagging", "KMS Keys"]);
        let tagging = &result.resource_types[0];
        // Only account 2's instance is missing tags; it maps to bravo, no tenant.
        assert_eq!(tagging.teams_non_compliant, 1);
        assert_eq!(tagging.tenants_non_compliant, 0);
        let kms = &result.resource_types[1];
        assert_eq!(kms.teams_non_compliant, 1);
        assert_eq!(kms.tenants_non_compliant, 0);
    }
}
