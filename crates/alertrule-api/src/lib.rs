//! alertrule-api — REST API for the alert rule operator.
//!
//! Exposes the object store over HTTP so workloads and AlertRules can be
//! created and inspected, and serves the liveness/readiness probes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/readyz` | Readiness (store reachable) |
//! | GET | `/api/v1/namespaces/{ns}/deployments` | List workloads |
//! | POST | `/api/v1/namespaces/{ns}/deployments` | Create a workload |
//! | GET | `/api/v1/namespaces/{ns}/deployments/{name}` | Get a workload |
//! | DELETE | `/api/v1/namespaces/{ns}/deployments/{name}` | Delete a workload |
//! | GET | `/api/v1/namespaces/{ns}/alertrules` | List alert rules |
//! | POST | `/api/v1/namespaces/{ns}/alertrules` | Create an alert rule |
//! | GET | `/api/v1/namespaces/{ns}/alertrules/{name}` | Get an alert rule |
//! | PUT | `/api/v1/namespaces/{ns}/alertrules/{name}` | Replace its spec |
//! | DELETE | `/api/v1/namespaces/{ns}/alertrules/{name}` | Delete an alert rule |
//! | GET | `/api/v1/namespaces/{ns}/prometheusrules/{name}` | Get a rule-group artifact |
//! | GET | `/api/v1/namespaces/{ns}/configmaps/{name}` | Get a rule-file artifact |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use alertrule_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the complete API router (probes + REST).
pub fn build_router(store: StateStore) -> Router {
    let api_state = ApiState { store };

    let api_routes = Router::new()
        .route(
            "/namespaces/{ns}/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route(
            "/namespaces/{ns}/deployments/{name}",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .route(
            "/namespaces/{ns}/alertrules",
            get(handlers::list_alert_rules).post(handlers::create_alert_rule),
        )
        .route(
            "/namespaces/{ns}/alertrules/{name}",
            get(handlers::get_alert_rule)
                .put(handlers::replace_alert_rule)
                .delete(handlers::delete_alert_rule),
        )
        .route(
            "/namespaces/{ns}/prometheusrules/{name}",
            get(handlers::get_prometheus_rule),
        )
        .route("/namespaces/{ns}/configmaps/{name}", get(handlers::get_config_map))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz).with_state(api_state))
}
