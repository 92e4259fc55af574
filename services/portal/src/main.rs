//! Compliance Portal
//!
//! HTTP service exposing the compliance overview, per-team and per-tenant
//! summaries, detail views, rules and the dashboard metrics. Identity
//! arrives from the fronting auth proxy as request headers.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use compliance_portal::aggregator::{self, GroupDimension};
use compliance_portal::dates;
use compliance_portal::metrics::{builtin_metrics, MetricContext, MetricRegistry};
use compliance_portal::pagination::QueryState;
use compliance_portal::store::{MemoryStore, SharedStore, StoreError};
use compliance_portal::views::{self, builtin_registry, GroupBy, Registry};
use compliance_portal::{resolve_groups, resolve_scope, AccountDirectory, Config, ScopedSource, UserClaims};

#[derive(Clone)]
struct AppState {
    config: Config,
    directory: AccountDirectory,
    store: Arc<SharedStore>,
    registry: Arc<Registry>,
    metrics: Arc<MetricRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .json()
        .init();

    info!("Starting Compliance Portal");

    let config = Config::from_env()?;
    let directory = AccountDirectory::new(config.account_mappings());
    let mandatory = config.mandatory_tags();
    let primary_tag = mandatory
        .first()
        .map(String::as_str)
        .unwrap_or("BSP")
        .to_string();

    let state = AppState {
        config,
        directory,
        store: Arc::new(SharedStore::new()),
        registry: Arc::new(builtin_registry(&primary_tag)),
        metrics: Arc::new(builtin_metrics()),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/compliance/overview", get(compliance_overview))
        .route("/api/v1/compliance/teams", get(team_summary))
        .route("/api/v1/compliance/tenants", get(tenant_summary))
        .route("/api/v1/compliance/views", get(list_views))
        .route("/api/v1/compliance/view/:id", get(view_details))
        .route("/api/v1/compliance/rule/:id", get(rule_report))
        .route("/api/v1/dashboard", get(dashboard))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!("Portal listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"status": "error", "message": self.1}));
        (self.0, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownCollection(_) => Self(StatusCode::NOT_FOUND, err.to_string()),
            _ => Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("{what} not found"))
}

/// Identity headers injected by the auth proxy. Absent headers mean an
/// unauthenticated (fully trusted) context such as a health check.
fn identity(headers: &HeaderMap) -> Option<UserClaims> {
    let email = headers.get("x-user-email")?.to_str().ok()?.to_string();
    let groups = headers
        .get("x-user-groups")
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(UserClaims { email, groups })
}

/// Loads the backing store on first use. The seed file path comes from
/// `store.seed_file`; without one the store starts empty and fills as
/// collectors deliver snapshots.
async fn backing_store(state: &AppState) -> Result<MemoryStore, StoreError> {
    let seed_file = state
        .config
        .get("store.seed_file")
        .and_then(Value::as_str)
        .map(str::to_string);
    let store = state
        .store
        .get_or_init(|| async move {
            let Some(path) = seed_file else {
                return Ok(MemoryStore::empty());
            };
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Init(format!("reading {path}: {e}")))?;
            let seed: Value = serde_json::from_str(&raw)
                .map_err(|e| StoreError::Init(format!("parsing {path}: {e}")))?;
            MemoryStore::from_seed(seed)
        })
        .await?;
    Ok(store.clone())
}

/// The user's scoped window onto the store plus the group names fed into
/// pipeline security fragments.
async fn scoped_store(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(ScopedSource<MemoryStore>, Vec<String>), ApiError> {
    let user = identity(headers);
    let admin = state.config.admin_email();
    let scope = resolve_scope(user.as_ref(), admin.as_deref(), &state.directory);
    let groups = resolve_groups(user.as_ref(), admin.as_deref());
    let store = backing_store(state).await?;
    Ok((ScopedSource::new(scope, store), groups))
}

/// Group names a rule report is expected to cover: every configured value
/// of the dimension, narrowed to the user's own groups when scoped.
fn expected_groups(state: &AppState, group_by: GroupBy, groups: &[String]) -> Vec<String> {
    let wildcard = groups.iter().any(|g| g == "*");
    let mut names: Vec<String> = Vec::new();
    for mapping in state.directory.mappings() {
        let name = match group_by {
            GroupBy::AccountId => mapping.account_id.clone(),
            GroupBy::Team => mapping.team.clone(),
            GroupBy::Tenant => match &mapping.tenant {
                Some(tenant) => tenant.id.clone(),
                None => continue,
            },
        };
        if name.is_empty() || names.contains(&name) {
            continue;
        }
        if wildcard || group_by != GroupBy::Team || groups.contains(&name) {
            names.push(name);
        }
    }
    names.sort();
    names
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "compliance-portal",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn compliance_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (source, _groups) = scoped_store(&state, &headers).await?;
    let overview = aggregator::overview(&source, &state.directory, &state.config).await?;
    Ok(Json(serde_json::to_value(overview).unwrap_or_default()))
}

async fn team_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (source, _groups) = scoped_store(&state, &headers).await?;
    let teams =
        aggregator::group_summary(&source, &state.directory, GroupDimension::Team, &state.config)
            .await?;
    Ok(Json(json!({"teams": teams})))
}

async fn tenant_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (source, _groups) = scoped_store(&state, &headers).await?;
    let tenants = aggregator::group_summary(
        &source,
        &state.directory,
        GroupDimension::Tenant,
        &state.config,
    )
    .await?;
    Ok(Json(json!({"tenants": tenants})))
}

async fn list_views(State(state): State<AppState>) -> Json<Value> {
    let views: Vec<Value> = state
        .registry
        .views()
        .iter()
        .map(|view| json!({"id": view.id, "name": view.name}))
        .collect();
    let rules: Vec<Value> = state
        .registry
        .rules()
        .iter()
        .map(|rule| {
            json!({
                "id": rule.id,
                "name": rule.name,
                "description": rule.description,
                "view": rule.view
            })
        })
        .collect();
    Json(json!({"views": views, "rules": rules}))
}

async fn view_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let view = state.registry.view(&id).ok_or_else(|| not_found("view"))?;
    let (source, groups) = scoped_store(&state, &headers).await?;

    let filterable = views::view_filterable_fields(view);
    let query = QueryState::decode(&params, &filterable);
    let page = views::run_view_details(&source, view, &query, &groups, uri.path(), &params).await?;

    Ok(Json(json!({
        "view": {"id": view.id, "name": view.name, "prominent_fields": view.prominent_fields},
        "page": page
    })))
}

async fn rule_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let rule = state.registry.rule(&id).ok_or_else(|| not_found("rule"))?;
    let query = QueryState::decode(&params, &[]);
    let group_by = query
        .group_by
        .as_deref()
        .and_then(GroupBy::parse)
        .unwrap_or(GroupBy::Team);
    let (source, groups) = scoped_store(&state, &headers).await?;

    let expected = expected_groups(&state, group_by, &groups);
    let reports =
        views::run_rule(&source, &state.registry, rule, group_by, &groups, &expected).await?;

    Ok(Json(json!({
        "rule": {
            "id": rule.id,
            "name": rule.name,
            "description": rule.description,
            "view": rule.view,
            "header": rule.header,
            "links": rule.links,
            "threshold": rule.threshold
        },
        "group_by": group_by.key(),
        "groups": reports
    })))
}

async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (source, _groups) = scoped_store(&state, &headers).await?;
    let today = chrono::Local::now().date_naive();
    let collections = ["tags", "elb_v2", "rds", "kms_key_metadata"];
    let Some(date) = dates::latest_date_across(&source, &collections, today).await else {
        return Ok(Json(json!({"date": null, "metrics": []})));
    };
    let ctx = MetricContext {
        source: &source,
        config: &state.config,
    };
    let readings = state.metrics.compute_all(&ctx, date).await;
    Ok(Json(json!({"date": date, "metrics": readings})))
}
