//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use alertrule_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn store_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) | StateError::Conflict { .. } => StatusCode::CONFLICT,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn get_one<R: Resource>(state: &ApiState, ns: String, name: String) -> Response {
    match state.store.get::<R>(&ObjectKey::new(ns, name)) {
        Ok(Some(object)) => ApiResponse::ok(object).into_response(),
        Ok(None) => error_response(&format!("{} not found", R::KIND), StatusCode::NOT_FOUND),
        Err(e) => store_error(&e),
    }
}

fn list_in<R: Resource>(state: &ApiState, ns: &str) -> Response {
    match state.store.list::<R>(Some(ns)) {
        Ok(objects) => ApiResponse::ok(objects).into_response(),
        Err(e) => store_error(&e),
    }
}

fn create_one<R: Resource>(state: &ApiState, object: R) -> Response {
    match state.store.create(&object) {
        Ok(created) => {
            info!(kind = %R::KIND, key = %created.key(), "created via API");
            (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
        }
        Err(e) => store_error(&e),
    }
}

fn delete_one<R: Resource>(state: &ApiState, ns: String, name: String) -> Response {
    match state.store.delete::<R>(&ObjectKey::new(ns, name)) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response(&format!("{} not found", R::KIND), StatusCode::NOT_FOUND),
        Err(e) => store_error(&e),
    }
}

// ── Probes ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

/// GET /readyz
pub async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.ping() {
        Ok(()) => ApiResponse::ok("ready").into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Create request body for a workload.
#[derive(Debug, Deserialize)]
pub struct CreateDeployment {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: DeploymentSpec,
}

/// GET /api/v1/namespaces/:ns/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
) -> impl IntoResponse {
    list_in::<Deployment>(&state, &ns)
}

/// POST /api/v1/namespaces/:ns/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
    Json(req): Json<CreateDeployment>,
) -> impl IntoResponse {
    let mut deployment = Deployment::new(&ns, &req.name);
    deployment.metadata.labels = req.labels;
    deployment.spec = req.spec;
    create_one(&state, deployment)
}

/// GET /api/v1/namespaces/:ns/deployments/:name
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    get_one::<Deployment>(&state, ns, name)
}

/// DELETE /api/v1/namespaces/:ns/deployments/:name
pub async fn delete_deployment(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    delete_one::<Deployment>(&state, ns, name)
}

// ── AlertRules ─────────────────────────────────────────────────

/// Create request body for an AlertRule.
#[derive(Debug, Deserialize)]
pub struct CreateAlertRule {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: AlertRuleShape,
}

/// Replace request body. `resourceVersion`, when given, must match the
/// stored object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceAlertRule {
    pub spec: AlertRuleShape,
    #[serde(default)]
    pub resource_version: Option<u64>,
}

/// GET /api/v1/namespaces/:ns/alertrules
pub async fn list_alert_rules(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
) -> impl IntoResponse {
    list_in::<AlertRule>(&state, &ns)
}

/// POST /api/v1/namespaces/:ns/alertrules
pub async fn create_alert_rule(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
    Json(req): Json<CreateAlertRule>,
) -> impl IntoResponse {
    let mut rule = AlertRule::new(&ns, &req.name, req.spec);
    rule.metadata.labels = req.labels;
    create_one(&state, rule)
}

/// GET /api/v1/namespaces/:ns/alertrules/:name
pub async fn get_alert_rule(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    get_one::<AlertRule>(&state, ns, name)
}

/// PUT /api/v1/namespaces/:ns/alertrules/:name
pub async fn replace_alert_rule(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<ReplaceAlertRule>,
) -> impl IntoResponse {
    let key = ObjectKey::new(ns, name);
    let mut rule = match state.store.get::<AlertRule>(&key) {
        Ok(Some(rule)) => rule,
        Ok(None) => return error_response("AlertRule not found", StatusCode::NOT_FOUND),
        Err(e) => return store_error(&e),
    };
    rule.spec = req.spec;
    if let Some(version) = req.resource_version {
        rule.metadata.resource_version = version;
    }
    match state.store.replace(&rule) {
        Ok(updated) => {
            info!(alertrule = %key, generation = updated.metadata.generation, "spec replaced via API");
            ApiResponse::ok(updated).into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// DELETE /api/v1/namespaces/:ns/alertrules/:name
pub async fn delete_alert_rule(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    delete_one::<AlertRule>(&state, ns, name)
}

// ── Artifacts ──────────────────────────────────────────────────

/// GET /api/v1/namespaces/:ns/prometheusrules/:name
pub async fn get_prometheus_rule(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    get_one::<PrometheusRule>(&state, ns, name)
}

/// GET /api/v1/namespaces/:ns/configmaps/:name
pub async fn get_config_map(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    get_one::<ConfigMap>(&state, ns, name)
}
