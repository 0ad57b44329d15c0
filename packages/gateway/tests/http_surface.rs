//! HTTP surface tests over the axum router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use praetor_gateway::{router, GatewayConfig, GatewayState};
use tower::ServiceExt;

fn test_state() -> Arc<GatewayState> {
    let config = GatewayConfig {
        default_tenant: Some("tenant-a".to_string()),
        // Keep response jitter negligible in tests.
        jitter_min_ms: 1,
        jitter_max_ms: 2,
        ..GatewayConfig::default()
    };
    GatewayState::new(config)
}

fn govern_body(tool: &str, agent: &str) -> Body {
    Body::from(
        serde_json::json!({
            "tool_name": tool,
            "agent_id": agent,
            "arguments": {"query": "x"},
        })
        .to_string(),
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn govern_without_tenant_is_unauthorized() {
    let config = GatewayConfig {
        default_tenant: None,
        jitter_min_ms: 1,
        jitter_max_ms: 2,
        ..GatewayConfig::default()
    };
    let app = router(GatewayState::new(config));

    let response = app
        .oneshot(
            Request::post("/api/v1/govern")
                .header("content-type", "application/json")
                .body(govern_body("read_database", "agent-1"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn govern_missing_entitlement_is_forbidden() {
    let state = test_state();
    state.reputation.set_score("agent-1", 0.9);
    let app = router(state);

    let response = app
        .oneshot(
            Request::post("/api/v1/govern")
                .header("content-type", "application/json")
                .body(govern_body("execute_payment", "agent-1"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["verdict"], "BLOCK");
    assert_eq!(body["error"], "entitlement_missing");
}

#[tokio::test]
async fn rate_limited_call_gets_retry_after() {
    let state = GatewayState::new(GatewayConfig {
        default_tenant: Some("tenant-a".to_string()),
        rate_limit_max_per_min: 1,
        jitter_min_ms: 1,
        jitter_max_ms: 2,
        ..GatewayConfig::default()
    });
    let app = router(state.clone());

    // First call consumes the window (it fails later in the pipeline, but
    // the rate slot is spent at admission).
    let first = app
        .clone()
        .oneshot(
            Request::post("/api/v1/govern")
                .header("content-type", "application/json")
                .body(govern_body("execute_payment", "agent-1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::FORBIDDEN);

    let second = app
        .oneshot(
            Request::post("/api/v1/govern")
                .header("content-type", "application/json")
                .body(govern_body("execute_payment", "agent-1"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        second.headers().get("Retry-After").unwrap().to_str().unwrap(),
        "60"
    );
}

#[tokio::test]
async fn reputation_endpoint_reports_tier() {
    let state = test_state();
    state.reputation.set_score("agent-42", 0.8);
    let app = router(state);

    let response = app
        .oneshot(
            Request::get("/api/reputation/agent-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!((body["score"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    assert_eq!(body["tier"], "gold");
}

#[tokio::test]
async fn spoke_registration_round_trip() {
    let state = test_state();
    let app = router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::post("/spokes")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "tenant_id": "tenant-a",
                        "agent_id": "audit-console",
                        "capabilities": ["governance.verdict"],
                        "trust": 0.9,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let descriptor = body_json(response).await;
    let spoke_id = descriptor["id"].as_str().unwrap().to_string();

    // The receiver is parked for a transport to collect.
    assert!(state.spoke_receivers.lock().contains_key(&spoke_id));

    let listed = app
        .clone()
        .oneshot(Request::get("/spokes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let spokes = body_json(listed).await;
    assert_eq!(spokes.as_array().unwrap().len(), 1);

    let metrics = app
        .oneshot(Request::get("/hub/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let metrics = body_json(metrics).await;
    assert_eq!(metrics["spokes_connected"], 1);
}

#[tokio::test]
async fn transaction_id_header_propagates() {
    let state = test_state();
    state.reputation.set_score("agent-1", 0.8);
    state.jury.set_signals("agent-1", praetor_gate::TrustSignals::uniform(0.8));
    state
        .entitlements
        .grant("agent-1", "data:read", std::time::Duration::from_secs(600));
    state.pool.top_up().await.unwrap();

    let app = router(state);
    let response = app
        .oneshot(
            Request::post("/api/v1/govern")
                .header("content-type", "application/json")
                .header("x-request-id", "tx-header-test")
                .body(govern_body("read_database", "agent-1"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["transaction_id"], "tx-header-test");
    assert_eq!(body["verdict"], "ALLOW");
}
