//! HTTP trigger surface for the token lifecycle engine
//!
//! Thin handlers over the lifecycle manager and recovery scheduler:
//! force-refresh one account, reconnect with a new refresh token, clear a
//! quarantine mark, list a user's quarantined accounts, run a recovery sweep
//! on demand. Credential-sensitive endpoints are gated by the rate limiters.
//!
//! Responses never contain token material; accounts are rendered through the
//! `AccountView` projection.

use std::sync::Arc;
use std::time::Instant;

use account_store::{Account, now_millis};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use marketplace::Platform;
use metrics_exporter_prometheus::PrometheusHandle;
use progress::ProgressBroadcaster;
use serde::{Deserialize, Serialize};
use token_lifecycle::{Error as LifecycleError, LifecycleManager, RecoveryScheduler};
use tracing::info;

use crate::events;
use crate::metrics::record_rate_limited;
use crate::rate_limit::RateLimiter;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub scheduler: Arc<RecoveryScheduler>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub refresh_limiter: Arc<RateLimiter>,
    pub reconnect_limiter: Arc<RateLimiter>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/accounts/{id}/refresh", post(force_refresh))
        .route("/accounts/{id}/reconnect", post(reconnect))
        .route("/accounts/{id}/quarantine/clear", post(clear_quarantine))
        .route("/accounts/{id}", delete(unlink_account))
        .route("/users/{user_id}/quarantined", get(list_quarantined))
        .route("/users/{user_id}/events", get(events::subscribe_events))
        .route("/recovery/sweep", post(run_sweep))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Token-free account projection for API responses.
#[derive(Debug, Serialize)]
struct AccountView {
    account_id: String,
    user_id: String,
    platform: Platform,
    expires_at: u64,
    invalid_until: Option<u64>,
    status: &'static str,
}

impl AccountView {
    fn from_account(account: &Account) -> Self {
        let status = if account.is_quarantined(now_millis()) {
            "quarantined"
        } else {
            "ok"
        };
        Self {
            account_id: account.account_id.clone(),
            user_id: account.user_id.clone(),
            platform: account.platform,
            expires_at: account.expires_at,
            invalid_until: account.invalid_until,
            status,
        }
    }
}

/// Caller identity for rate limiting: the first forwarded address, or a
/// fixed tag for direct connections.
fn caller_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "direct".to_string())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a lifecycle error to an HTTP response.
///
/// A classified failure never surfaces as a bare 500: quarantine and
/// reconnection cases get 409 with an explicit flag, transient trouble gets
/// 503 with a retry hint.
fn error_response(err: LifecycleError) -> Response {
    match &err {
        LifecycleError::NotFound(_) => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": err.to_string() }),
        ),
        LifecycleError::Quarantined { invalid_until, .. } => json_response(
            StatusCode::CONFLICT,
            serde_json::json!({
                "error": err.to_string(),
                "quarantined": true,
                "invalid_until": invalid_until,
            }),
        ),
        LifecycleError::ReconnectionRequired(_) => json_response(
            StatusCode::CONFLICT,
            serde_json::json!({
                "error": err.to_string(),
                "requires_reconnection": true,
            }),
        ),
        LifecycleError::Transient(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "error": err.to_string(),
                "retryable": true,
            }),
        ),
        LifecycleError::UnsupportedPlatform(_) | LifecycleError::Store(_) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": err.to_string() }),
        ),
    }
}

fn rate_limited_response(endpoint: &'static str) -> Response {
    record_rate_limited(endpoint);
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        serde_json::json!({ "error": "rate limit exceeded, retry later" }),
    )
}

/// POST /accounts/:id/refresh — force-refresh one account now.
///
/// Ignores an active quarantine window (user-triggered "retry now").
async fn force_refresh(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.refresh_limiter.allow(&caller_key(&headers), &id) {
        return rate_limited_response("force_refresh");
    }

    match state.manager.refresh(&id, true).await {
        Ok(account) => json_response(
            StatusCode::OK,
            serde_json::json!({ "account": AccountView::from_account(&account) }),
        ),
        Err(err) => error_response(err),
    }
}

/// Request body for the reconnect endpoint.
#[derive(Deserialize)]
struct ReconnectRequest {
    refresh_token: String,
}

/// POST /accounts/:id/reconnect — store a user-supplied refresh token and
/// validate it with an immediate forced refresh.
async fn reconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ReconnectRequest>,
) -> Response {
    if !state.reconnect_limiter.allow(&caller_key(&headers), &id) {
        return rate_limited_response("reconnect");
    }
    if body.refresh_token.trim().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "refresh_token must not be blank" }),
        );
    }

    match state.manager.reconnect(&id, body.refresh_token).await {
        Ok(account) => {
            info!(account_id = id, "account reconnected");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "account": AccountView::from_account(&account) }),
            )
        }
        Err(err) => error_response(err),
    }
}

/// POST /accounts/:id/quarantine/clear — manual clear of the mark.
async fn clear_quarantine(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.clear_quarantine(&id).await {
        Ok(account) => json_response(
            StatusCode::OK,
            serde_json::json!({ "account": AccountView::from_account(&account) }),
        ),
        Err(err) => error_response(err),
    }
}

/// DELETE /accounts/:id — unlink an account. Idempotent.
async fn unlink_account(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.remove_account(&id).await {
        Ok(_) => json_response(
            StatusCode::OK,
            serde_json::json!({ "account_id": id, "status": "removed" }),
        ),
        Err(err) => error_response(err),
    }
}

/// GET /users/:user_id/quarantined — the user's quarantined accounts as
/// token-free projections.
async fn list_quarantined(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let marks = state
        .manager
        .store()
        .quarantined_for_user(&user_id, now_millis())
        .await;
    json_response(
        StatusCode::OK,
        serde_json::json!({ "quarantined": marks }),
    )
}

/// Query parameters for the on-demand sweep.
#[derive(Deserialize)]
struct SweepParams {
    platform: Option<Platform>,
}

/// POST /recovery/sweep — run a recovery sweep now.
///
/// A sweep already in progress makes this a no-op reported as 409.
async fn run_sweep(State(state): State<AppState>, Query(params): Query<SweepParams>) -> Response {
    match state.scheduler.run_sweep(params.platform).await {
        Some(report) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "recovered": report.recovered,
                "failed": report.failed,
            }),
        ),
        None => json_response(
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "a recovery sweep is already running" }),
        ),
    }
}

/// GET /health — store summary and uptime.
async fn health(State(state): State<AppState>) -> Response {
    let store = state.manager.store();
    let total = store.len().await;
    let quarantined = store.list_quarantined(None, now_millis()).await.len();
    let status = if quarantined == 0 { "healthy" } else { "degraded" };

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": status,
            "accounts_total": total,
            "accounts_quarantined": quarantined,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// GET /metrics — Prometheus text exposition format.
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
