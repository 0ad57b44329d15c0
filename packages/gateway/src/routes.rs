//! HTTP Surface
//!
//! Axum routes over the gateway state: the governance endpoint, the
//! reputation lookup, spoke administration and hub metrics. Tenant
//! resolution walks `Authorization: Bearer` → `X-Tenant-ID` → configured
//! default.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::GovernError;
use crate::pipeline::{govern, GovernRequest};
use crate::state::GatewayState;

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/govern", post(govern_handler))
        .route("/api/reputation/{agent}", get(reputation_handler))
        .route("/spokes", get(list_spokes).post(register_spoke))
        .route("/hub/metrics", get(hub_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Resolve the tenant: explicit body value, then bearer API key, then
/// `X-Tenant-ID`, then the configured default.
fn resolve_tenant(
    state: &GatewayState,
    headers: &HeaderMap,
    body_tenant: Option<&str>,
) -> Result<String, GovernError> {
    if let Some(tenant) = body_tenant.filter(|t| !t.is_empty()) {
        return Ok(tenant.to_string());
    }

    if let Some(key) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Some(tenant) = state.config.api_keys.get(key) {
            return Ok(tenant.clone());
        }
    }

    if let Some(tenant) = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
    {
        return Ok(tenant.to_string());
    }

    state
        .config
        .default_tenant
        .clone()
        .ok_or(GovernError::Unauthenticated)
}

/// Transaction id propagates in `X-Request-ID` / `X-Transaction-ID`.
fn resolve_transaction_id(headers: &HeaderMap) -> String {
    for header in ["x-request-id", "x-transaction-id"] {
        if let Some(id) = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return id.to_string();
        }
    }
    Uuid::new_v4().to_string()
}

fn error_response(err: GovernError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "verdict": "BLOCK",
        "error": err.kind(),
        "message": err.to_string(),
    });

    let mut response = (status, Json(body)).into_response();
    if let GovernError::RateLimitExceeded { retry_after_secs } = &err {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

async fn govern_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(mut req): Json<GovernRequest>,
) -> Response {
    if req.agent_id.is_empty() {
        if let Some(agent) = headers.get("x-agent-id").and_then(|v| v.to_str().ok()) {
            req.agent_id = agent.to_string();
        }
    }

    let tenant_id = match resolve_tenant(&state, &headers, req.tenant_id.as_deref()) {
        Ok(tenant) => tenant,
        Err(e) => return error_response(e),
    };
    let tx_id = resolve_transaction_id(&headers);
    let agent_id = req.agent_id.clone();

    let outcome = govern(&state, tx_id, tenant_id, req).await;

    // Response timing is decorrelated from processing time.
    state.jitter.inject(&agent_id).await;

    match outcome {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reputation_handler(
    State(state): State<Arc<GatewayState>>,
    Path(agent): Path<String>,
) -> Response {
    Json(state.reputation.reputation(&agent)).into_response()
}

#[derive(Debug, Deserialize)]
struct SpokeRegistration {
    tenant_id: String,
    agent_id: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default = "default_spoke_trust")]
    trust: f64,
    #[serde(default)]
    entitlements: HashSet<String>,
}

fn default_spoke_trust() -> f64 {
    0.5
}

async fn register_spoke(
    State(state): State<Arc<GatewayState>>,
    Json(reg): Json<SpokeRegistration>,
) -> Response {
    let handle = state.hub.registry().register(
        reg.tenant_id,
        reg.agent_id,
        reg.capabilities,
        reg.trust,
        reg.entitlements,
    );

    let descriptor = handle.descriptor.clone();
    // Park the receive side until a transport collects it.
    state
        .spoke_receivers
        .lock()
        .insert(descriptor.id.clone(), handle.receiver);

    (StatusCode::CREATED, Json(descriptor)).into_response()
}

async fn list_spokes(State(state): State<Arc<GatewayState>>) -> Response {
    Json(state.hub.registry().list()).into_response()
}

async fn hub_metrics(State(state): State<Arc<GatewayState>>) -> Response {
    Json(state.hub.metrics()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn state_with(default_tenant: Option<&str>) -> Arc<GatewayState> {
        let mut config = GatewayConfig::default();
        config.default_tenant = default_tenant.map(|s| s.to_string());
        config
            .api_keys
            .insert("secret-key".to_string(), "tenant-from-key".to_string());
        GatewayState::new(config)
    }

    #[test]
    fn test_tenant_resolution_order() {
        let state = state_with(Some("tenant-default"));

        // Body wins.
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_tenant(&state, &headers, Some("tenant-body")).unwrap(),
            "tenant-body"
        );

        // Bearer key next.
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret-key".parse().unwrap());
        headers.insert("x-tenant-id", "tenant-header".parse().unwrap());
        assert_eq!(
            resolve_tenant(&state, &headers, None).unwrap(),
            "tenant-from-key"
        );

        // Then the explicit header.
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", "tenant-header".parse().unwrap());
        assert_eq!(
            resolve_tenant(&state, &headers, None).unwrap(),
            "tenant-header"
        );

        // Then the default.
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_tenant(&state, &headers, None).unwrap(),
            "tenant-default"
        );
    }

    #[test]
    fn test_tenant_resolution_fails_without_default() {
        let state = state_with(None);
        let headers = HeaderMap::new();
        assert!(matches!(
            resolve_tenant(&state, &headers, None),
            Err(GovernError::Unauthenticated)
        ));
    }

    #[test]
    fn test_transaction_id_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "tx-from-header".parse().unwrap());
        assert_eq!(resolve_transaction_id(&headers), "tx-from-header");

        let mut headers = HeaderMap::new();
        headers.insert("x-transaction-id", "tx-alt".parse().unwrap());
        assert_eq!(resolve_transaction_id(&headers), "tx-alt");

        // Generated otherwise.
        let headers = HeaderMap::new();
        assert_eq!(resolve_transaction_id(&headers).len(), 36);
    }
}
