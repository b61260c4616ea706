//! Router-level tests: requests go through axum routing and extractors.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use alertrule_api::build_router;
use alertrule_state::StateStore;

fn test_store() -> StateStore {
    StateStore::open_in_memory().unwrap()
}

async fn send(store: &StateStore, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let router = build_router(store.clone());
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn readiness_reports_store() {
    let store = test_store();
    let (status, body) = send(&store, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(&store, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn alert_rule_lifecycle() {
    let store = test_store();
    let base = "/api/v1/namespaces/shop/alertrules";

    let (status, body) = send(
        &store,
        "POST",
        base,
        Some(json!({
            "name": "checkout-rules",
            "spec": {
                "targetDeployment": "checkout",
                "rules": [{
                    "name": "HighErrorRate",
                    "condition": "rate(errors[5m]) > 0.1",
                    "duration": "5m",
                    "severity": "warning",
                    "notifications": [{ "email": "oncall@example.com" }]
                }]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["metadata"]["generation"], 1);

    let (status, body) = send(&store, "GET", base, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&store, "GET", &format!("{base}/checkout-rules"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["spec"]["targetDeployment"], "checkout");

    let (status, _) = send(&store, "DELETE", &format!("{base}/checkout-rules"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&store, "GET", &format!("{base}/checkout-rules"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn mixed_shape_is_rejected() {
    let store = test_store();
    let (status, _) = send(
        &store,
        "POST",
        "/api/v1/namespaces/shop/alertrules",
        Some(json!({
            "name": "mixed",
            "spec": {
                "alert": "x",
                "expr": "up == 0",
                "targetDeployment": "checkout",
                "rules": []
            }
        })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let store = test_store();
    let (status, _) = send(
        &store,
        "POST",
        "/api/v1/namespaces/shop/deployments",
        Some(json!({ "name": "checkout" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&store, "GET", "/api/v1/namespaces/other/deployments", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
    let (_, body) = send(&store, "GET", "/api/v1/namespaces/shop/deployments", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
