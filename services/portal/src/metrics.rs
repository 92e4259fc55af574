//! Dashboard metric registry.
//!
//! Each metric is a small headline figure for the landing dashboard,
//! computed over one snapshot day. Metrics are registered explicitly at
//! startup; a metric that fails to compute reports no value instead of
//! failing the whole dashboard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::aggregator::{is_deprecated_engine, optional_collection};
use crate::config::Config;
use crate::dates::SnapshotDate;
use crate::store::{CollectionSource, FindOptions, StoreError};
use crate::tags;

pub struct MetricContext<'a> {
    pub source: &'a dyn CollectionSource,
    pub config: &'a Config,
}

/// One dashboard figure. `compute` returns a percentage, or `None` when
/// there is nothing to measure (no matching resources on that day).
#[async_trait]
pub trait DashboardMetric: Send + Sync {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn description(&self) -> &'static str;

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError>;

    /// Optional supporting detail line shown under the figure.
    async fn key_detail(
        &self,
        _ctx: &MetricContext<'_>,
        _date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReading {
    pub id: String,
    pub title: String,
    pub description: String,
    pub value: Option<u8>,
    pub key_detail: Option<String>,
}

#[derive(Default, Clone)]
pub struct MetricRegistry {
    metrics: Vec<Arc<dyn DashboardMetric>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metric: Arc<dyn DashboardMetric>) {
        self.metrics.push(metric);
    }

    /// Computes every registered metric in registration order. A failing
    /// metric is logged and reported without a value.
    pub async fn compute_all(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Vec<MetricReading> {
        let mut readings = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            let value = match metric.compute(ctx, date).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(metric = metric.id(), error = %err, "metric computation failed");
                    None
                }
            };
            let key_detail = match metric.key_detail(ctx, date).await {
                Ok(detail) => detail,
                Err(err) => {
                    warn!(metric = metric.id(), error = %err, "metric detail failed");
                    None
                }
            };
            readings.push(MetricReading {
                id: metric.id().to_string(),
                title: metric.title().to_string(),
                description: metric.description().to_string(),
                value,
                key_detail,
            });
        }
        readings
    }
}

pub fn builtin_metrics() -> MetricRegistry {
    let mut registry = MetricRegistry::new();
    registry.register(Arc::new(TagComplianceMetric));
    registry.register(Arc::new(SecureLoadBalancersMetric));
    registry.register(Arc::new(CurrentDbVersionsMetric));
    registry.register(Arc::new(KmsRotationMetric));
    registry.register(Arc::new(ActiveAlbsMetric));
    registry.register(Arc::new(ConfiguredAlbsMetric));
    registry.register(Arc::new(ModernLoadBalancersMetric));
    registry.register(Arc::new(OldAmisMetric));
    registry.register(Arc::new(InstancesOldAmisMetric));
    registry
}

fn percentage(part: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    Some((part as f64 / total as f64 * 100.0).round() as u8)
}

fn config_field<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    doc.pointer(&format!("/Configuration/{name}"))
        .or_else(|| doc.get(name))
}

fn snapshot_day(date: SnapshotDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year, date.month, date.day)
}

fn creation_date(doc: &Value) -> Option<NaiveDate> {
    config_field(doc, "CreationDate")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.date_naive())
}

fn is_application_lb(doc: &Value) -> bool {
    config_field(doc, "Type").and_then(Value::as_str) == Some("application")
}

/// Share of resources carrying every mandatory tag.
pub struct TagComplianceMetric;

#[async_trait]
impl DashboardMetric for TagComplianceMetric {
    fn id(&self) -> &'static str {
        "overall-compliance"
    }

    fn title(&self) -> &'static str {
        "Overall Compliance"
    }

    fn description(&self) -> &'static str {
        "Resources with all mandatory tags"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let mandatory = ctx.config.mandatory_tags();
        let collection = ctx.source.collection("tags")?;
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        let mut total = 0u64;
        let mut compliant = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            if tags::is_excluded_bucket(&doc) {
                continue;
            }
            total += 1;
            let tag_map = tags::normalize_tags(&doc);
            if tags::missing_mandatory_tags(&tag_map, &mandatory).is_empty() {
                compliant += 1;
            }
        }
        Ok(percentage(compliant, total))
    }
}

/// Share of load balancers with an HTTPS/TLS (or classic SSL) listener.
pub struct SecureLoadBalancersMetric;

#[async_trait]
impl DashboardMetric for SecureLoadBalancersMetric {
    fn id(&self) -> &'static str {
        "secure-loadbalancers"
    }

    fn title(&self) -> &'static str {
        "Secure Load Balancers"
    }

    fn description(&self) -> &'static str {
        "Load balancers with HTTPS/TLS"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let mut total = 0u64;
        let mut secure = 0u64;

        let mut secure_arns = HashSet::new();
        let listeners = ctx.source.collection("elb_v2_listeners")?;
        let mut cursor = listeners.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            let protocol = config_field(&doc, "Protocol").and_then(Value::as_str);
            if matches!(protocol, Some("HTTPS") | Some("TLS")) {
                if let Some(arn) = config_field(&doc, "LoadBalancerArn").and_then(Value::as_str) {
                    secure_arns.insert(arn.to_string());
                }
            }
        }

        let elb_v2 = ctx.source.collection("elb_v2")?;
        let mut cursor = elb_v2.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            total += 1;
            let is_secure = config_field(&doc, "LoadBalancerArn")
                .and_then(Value::as_str)
                .is_some_and(|arn| secure_arns.contains(arn));
            if is_secure {
                secure += 1;
            }
        }

        let classic = ctx.source.collection("elb_classic")?;
        let mut cursor = classic.find(date.filter(), FindOptions::default()).await?;
        while let Some(doc) = cursor.try_next().await? {
            total += 1;
            let descriptions = config_field(&doc, "ListenerDescriptions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let is_secure = descriptions.iter().any(|desc| {
                matches!(
                    desc.pointer("/Listener/Protocol").and_then(Value::as_str),
                    Some("HTTPS") | Some("SSL")
                )
            });
            if is_secure {
                secure += 1;
            }
        }

        Ok(percentage(secure, total))
    }
}

/// Rotation coverage over customer-managed encryption keys. AWS-managed
/// and asymmetric signing keys rotate on their own schedule and are
/// excluded from the figure.
pub struct KmsRotationMetric;

fn is_customer_encryption_key(doc: &Value) -> bool {
    config_field(doc, "KeyUsage").and_then(Value::as_str) == Some("ENCRYPT_DECRYPT")
        && config_field(doc, "KeyManager").and_then(Value::as_str) == Some("CUSTOMER")
}

#[async_trait]
impl DashboardMetric for KmsRotationMetric {
    fn id(&self) -> &'static str {
        "kms-rotation"
    }

    fn title(&self) -> &'static str {
        "KMS Key Rotation"
    }

    fn description(&self) -> &'static str {
        "KMS keys with automatic rotation enabled"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let collection = ctx.source.collection("kms_key_metadata")?;
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        let mut total = 0u64;
        let mut rotating = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            if !is_customer_encryption_key(&doc) {
                continue;
            }
            total += 1;
            if config_field(&doc, "KeyRotationEnabled") == Some(&Value::Bool(true)) {
                rotating += 1;
            }
        }
        Ok(percentage(rotating, total))
    }

    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        let collection = ctx.source.collection("kms_key_metadata")?;
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;

        // Two years before the snapshot day; clamp for leap-day snapshots.
        let cutoff = NaiveDate::from_ymd_opt(date.year - 2, date.month, date.day)
            .or_else(|| NaiveDate::from_ymd_opt(date.year - 2, date.month, 28));

        let mut total = 0u64;
        let mut old = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            if !is_customer_encryption_key(&doc) {
                continue;
            }
            total += 1;
            let created = config_field(&doc, "CreationDate")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.date_naive());
            if let (Some(created), Some(cutoff)) = (created, cutoff) {
                if created < cutoff {
                    old += 1;
                }
            }
        }
        Ok(Some(format!("{old} of {total} KMS keys over 2 years old")))
    }
}

/// RDS instances not running a deprecated engine version.
pub struct CurrentDbVersionsMetric;

#[async_trait]
impl DashboardMetric for CurrentDbVersionsMetric {
    fn id(&self) -> &'static str {
        "current-db-versions"
    }

    fn title(&self) -> &'static str {
        "Current DB Versions"
    }

    fn description(&self) -> &'static str {
        "RDS instances running current versions"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let deprecated = ctx.config.deprecated_versions();
        let collection = ctx.source.collection("rds")?;
        let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
        let mut total = 0u64;
        let mut current = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            total += 1;
            if !is_deprecated_engine(&doc, &deprecated) {
                current += 1;
            }
        }
        Ok(percentage(current, total))
    }
}

async fn alb_activity(
    ctx: &MetricContext<'_>,
    date: SnapshotDate,
) -> Result<(u64, u64), StoreError> {
    let collection = ctx.source.collection("elb_v2")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut total = 0u64;
    let mut active = 0u64;
    while let Some(doc) = cursor.try_next().await? {
        if !is_application_lb(&doc) {
            continue;
        }
        total += 1;
        let state = config_field(&doc, "State")
            .and_then(|s| s.get("Code"))
            .and_then(Value::as_str);
        if matches!(state, Some("active") | Some("provisioning")) {
            active += 1;
        }
    }
    Ok((total, active))
}

/// Share of application load balancers in an active or provisioning state.
pub struct ActiveAlbsMetric;

#[async_trait]
impl DashboardMetric for ActiveAlbsMetric {
    fn id(&self) -> &'static str {
        "active-albs"
    }

    fn title(&self) -> &'static str {
        "Active ALBs"
    }

    fn description(&self) -> &'static str {
        "Application Load Balancers that are active"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let (total, active) = alb_activity(ctx, date).await?;
        Ok(percentage(active, total))
    }

    /// Empty auto-scaling groups when that collection exists, otherwise the
    /// inactive-ALB count.
    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        if let Some(asgs) = optional_collection(ctx.source, "auto_scaling_groups")? {
            let mut cursor = asgs.find(date.filter(), FindOptions::default()).await?;
            let mut total = 0u64;
            let mut empty = 0u64;
            while let Some(doc) = cursor.try_next().await? {
                total += 1;
                let capacity = config_field(&doc, "DesiredCapacity")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let instances = config_field(&doc, "Instances")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                if capacity == 0 || instances == 0 {
                    empty += 1;
                }
            }
            if total > 0 {
                return Ok(Some(format!(
                    "{empty} of {total} auto scaling groups are empty"
                )));
            }
        }
        let (total, active) = alb_activity(ctx, date).await?;
        if total == 0 {
            return Ok(Some("No ALBs to evaluate".to_string()));
        }
        let inactive = total - active;
        if inactive == 0 {
            return Ok(Some(format!("All {total} ALBs are active")));
        }
        Ok(Some(format!("{inactive} of {total} ALBs are inactive")))
    }
}

fn has_usable_health_check(tg: &Value) -> bool {
    let enabled = config_field(tg, "HealthCheckEnabled") != Some(&Value::Bool(false));
    let path = config_field(tg, "HealthCheckPath")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.is_empty());
    let protocol = matches!(
        config_field(tg, "HealthCheckProtocol").and_then(Value::as_str),
        Some("HTTP") | Some("HTTPS")
    );
    enabled && path && protocol
}

async fn alb_configuration(
    ctx: &MetricContext<'_>,
    date: SnapshotDate,
) -> Result<(u64, u64), StoreError> {
    let mut configured_arns = HashSet::new();
    let target_groups = ctx.source.collection("elb_v2_target_groups")?;
    let mut cursor = target_groups
        .find(date.filter(), FindOptions::default())
        .await?;
    while let Some(tg) = cursor.try_next().await? {
        if !has_usable_health_check(&tg) {
            continue;
        }
        let arns = config_field(&tg, "LoadBalancerArns")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for arn in arns.iter().filter_map(Value::as_str) {
            configured_arns.insert(arn.to_string());
        }
    }

    let elb_v2 = ctx.source.collection("elb_v2")?;
    let mut cursor = elb_v2.find(date.filter(), FindOptions::default()).await?;
    let mut total = 0u64;
    let mut configured = 0u64;
    while let Some(doc) = cursor.try_next().await? {
        if !is_application_lb(&doc) {
            continue;
        }
        total += 1;
        let arn = doc
            .get("resource_id")
            .and_then(Value::as_str)
            .or_else(|| config_field(&doc, "LoadBalancerArn").and_then(Value::as_str));
        if arn.is_some_and(|a| configured_arns.contains(a)) {
            configured += 1;
        }
    }
    Ok((total, configured))
}

/// ALBs with at least one target group carrying a usable HTTP health check.
pub struct ConfiguredAlbsMetric;

#[async_trait]
impl DashboardMetric for ConfiguredAlbsMetric {
    fn id(&self) -> &'static str {
        "configured-albs"
    }

    fn title(&self) -> &'static str {
        "Correctly Configured ALBs"
    }

    fn description(&self) -> &'static str {
        "ALBs with proper health checks and targets"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let (total, configured) = alb_configuration(ctx, date).await?;
        Ok(percentage(configured, total))
    }

    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        let (total, configured) = alb_configuration(ctx, date).await?;
        if total == 0 {
            return Ok(Some("No ALBs to evaluate".to_string()));
        }
        let misconfigured = total - configured;
        if misconfigured == 0 {
            return Ok(Some(format!("All {total} ALBs are correctly configured")));
        }
        Ok(Some(format!("{misconfigured} of {total} ALBs misconfigured")))
    }
}

async fn load_balancer_mix(
    ctx: &MetricContext<'_>,
    date: SnapshotDate,
) -> Result<(u64, u64), StoreError> {
    let elb_v2 = ctx.source.collection("elb_v2")?;
    let mut cursor = elb_v2.find(date.filter(), FindOptions::default()).await?;
    let mut modern = 0u64;
    while cursor.try_next().await?.is_some() {
        modern += 1;
    }

    let classic_collection = ctx.source.collection("elb_classic")?;
    let mut cursor = classic_collection
        .find(date.filter(), FindOptions::default())
        .await?;
    let mut classic = 0u64;
    while cursor.try_next().await?.is_some() {
        classic += 1;
    }
    Ok((modern, classic))
}

/// ALB/NLB adoption over classic ELBs.
pub struct ModernLoadBalancersMetric;

#[async_trait]
impl DashboardMetric for ModernLoadBalancersMetric {
    fn id(&self) -> &'static str {
        "modern-loadbalancers"
    }

    fn title(&self) -> &'static str {
        "Modern Load Balancers"
    }

    fn description(&self) -> &'static str {
        "Using ALB/NLB instead of Classic ELB"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let (modern, classic) = load_balancer_mix(ctx, date).await?;
        Ok(percentage(modern, modern + classic))
    }

    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        let (modern, classic) = load_balancer_mix(ctx, date).await?;
        let total = modern + classic;
        Ok(Some(format!(
            "{classic} of {total} load balancers using deprecated Classic ELB"
        )))
    }
}

async fn ami_ages(
    ctx: &MetricContext<'_>,
    date: SnapshotDate,
) -> Result<(u64, u64), StoreError> {
    let cutoff = snapshot_day(date).map(|d| d - Duration::days(90));
    let collection = ctx.source.collection("amis")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut total = 0u64;
    let mut recent = 0u64;
    while let Some(doc) = cursor.try_next().await? {
        total += 1;
        if let (Some(created), Some(cutoff)) = (creation_date(&doc), cutoff) {
            if created > cutoff {
                recent += 1;
            }
        }
    }
    Ok((total, recent))
}

/// AMIs created within the last 90 days of the snapshot.
pub struct OldAmisMetric;

#[async_trait]
impl DashboardMetric for OldAmisMetric {
    fn id(&self) -> &'static str {
        "old-amis"
    }

    fn title(&self) -> &'static str {
        "AMIs < 90 Days Old"
    }

    fn description(&self) -> &'static str {
        "AMIs created within the last 90 days"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let (total, recent) = ami_ages(ctx, date).await?;
        Ok(percentage(recent, total))
    }

    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        let (total, recent) = ami_ages(ctx, date).await?;
        if total == 0 {
            return Ok(Some("No AMIs found".to_string()));
        }
        let old = total - recent;
        if old == 0 {
            return Ok(Some(format!("All {total} AMIs are less than 90 days old")));
        }
        Ok(Some(format!("{old} of {total} AMIs are older than 90 days")))
    }
}

async fn ami_age_by_image(
    ctx: &MetricContext<'_>,
    date: SnapshotDate,
) -> Result<HashMap<String, bool>, StoreError> {
    let cutoff = snapshot_day(date).map(|d| d - Duration::days(90));
    let collection = ctx.source.collection("amis")?;
    let mut cursor = collection.find(date.filter(), FindOptions::default()).await?;
    let mut ages = HashMap::new();
    while let Some(doc) = cursor.try_next().await? {
        let Some(image_id) = config_field(&doc, "ImageId").and_then(Value::as_str) else {
            continue;
        };
        let Some(created) = creation_date(&doc) else {
            continue;
        };
        let is_old = cutoff.is_some_and(|cutoff| created <= cutoff);
        ages.insert(image_id.to_string(), is_old);
    }
    Ok(ages)
}

fn is_running_instance(doc: &Value) -> bool {
    config_field(doc, "State")
        .and_then(|s| s.get("Name"))
        .and_then(Value::as_str)
        == Some("running")
}

/// Running EC2 instances whose AMI is under 90 days old.
pub struct InstancesOldAmisMetric;

#[async_trait]
impl DashboardMetric for InstancesOldAmisMetric {
    fn id(&self) -> &'static str {
        "instances-old-amis"
    }

    fn title(&self) -> &'static str {
        "Instances with Current AMIs"
    }

    fn description(&self) -> &'static str {
        "EC2 instances using AMIs less than 90 days old"
    }

    async fn compute(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<u8>, StoreError> {
        let ages = ami_age_by_image(ctx, date).await?;
        let instances = ctx.source.collection("ec2")?;
        let mut cursor = instances.find(date.filter(), FindOptions::default()).await?;
        let mut running = 0u64;
        let mut current = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            if !is_running_instance(&doc) {
                continue;
            }
            running += 1;
            let image_id = config_field(&doc, "ImageId").and_then(Value::as_str);
            if image_id.is_some_and(|id| ages.get(id) == Some(&false)) {
                current += 1;
            }
        }
        Ok(percentage(current, running))
    }

    async fn key_detail(
        &self,
        ctx: &MetricContext<'_>,
        date: SnapshotDate,
    ) -> Result<Option<String>, StoreError> {
        let ages = ami_age_by_image(ctx, date).await?;
        let instances = ctx.source.collection("ec2")?;
        let mut cursor = instances.find(date.filter(), FindOptions::default()).await?;
        let mut running = 0u64;
        let mut old = 0u64;
        while let Some(doc) = cursor.try_next().await? {
            if !is_running_instance(&doc) {
                continue;
            }
            running += 1;
            let image_id = config_field(&doc, "ImageId").and_then(Value::as_str);
            if image_id.is_some_and(|id| ages.get(id) == Some(&true)) {
                old += 1;
            }
        }
        if running == 0 {
            return Ok(Some("No running instances found".to_string()));
        }
        if old == 0 {
            return Ok(Some(format!(
                "All {running} running instances use current AMIs"
            )));
        }
        Ok(Some(format!(
            "{old} of {running} running instances use AMIs older than 90 days"
        )))
    }
}
