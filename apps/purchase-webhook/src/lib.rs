use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod document_store;
pub mod purchase;
pub mod purchase_store;
pub mod signature;
pub mod webhook;

use crate::config::Config;
use crate::purchase_store::SharedPurchaseStore;

const SERVICE_NAME: &str = "barber-blueprint-purchase-webhook";

#[derive(Clone)]
pub(crate) struct AppState {
    config: Arc<Config>,
    purchases: SharedPurchaseStore,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    purchase_store: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    webhook_secret_configured: bool,
}

pub fn build_router(config: Config, purchases: SharedPurchaseStore) -> Router {
    let webhook_path = config.webhook_path.clone();
    let state = AppState {
        config: Arc::new(config),
        purchases,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        // Every verb reaches the handler so it can answer 405 itself.
        .route(&webhook_path, any(webhook::purchase_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        purchase_store: state.purchases.backend_name(),
    })
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let webhook_secret_configured = state.config.webhook_secret_configured();

    if webhook_secret_configured {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                webhook_secret_configured,
            }),
        );
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            webhook_secret_configured,
        }),
    )
}

#[cfg(test)]
mod tests;
