//! HTTP routes for the LarkRelay webhook endpoint.
//!
//! This is the single top-level responder: bridge outcomes and classifier
//! results are turned into HTTP responses here and nowhere else.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

use crate::bridge::{ChatOutcome, RelayBridge};
use crate::event::{classify, InboundEvent};
use crate::store::KvStore;
use larkrelay_common::logging::generate_trace_id;

// ============================================================================
// State
// ============================================================================

/// Shared state for the relay HTTP server.
pub struct RelayState {
    pub bridge: RelayBridge,
    pub store: Arc<dyn KvStore>,
}

/// Build the relay router.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/webhook/feishu", post(feishu_webhook))
        .with_state(state)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Debug, Serialize)]
struct DirectResponse {
    result: String,
}

fn status_response(code: StatusCode, status: &'static str) -> Response {
    (code, Json(StatusResponse { status })).into_response()
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "larkrelay-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    if !state.store.is_healthy().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready",
                service: "larkrelay-server",
                version: env!("CARGO_PKG_VERSION"),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ready",
            service: "larkrelay-server",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ============================================================================
// Feishu Webhook
// ============================================================================

async fn feishu_webhook(State(state): State<Arc<RelayState>>, body: String) -> Response {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!("feishu_webhook", trace_id = %trace_id);

    async move {
        match classify(&body) {
            InboundEvent::Challenge(challenge) => {
                tracing::info!("URL verification challenge received");
                (StatusCode::OK, Json(ChallengeResponse { challenge })).into_response()
            }
            InboundEvent::Direct(input) => {
                let input = input.trim();
                if input.is_empty() {
                    return status_response(StatusCode::OK, "empty input ignored");
                }
                let result = state.bridge.handle_direct(input).await;
                (StatusCode::OK, Json(DirectResponse { result })).into_response()
            }
            InboundEvent::Message(event) => match state.bridge.handle_message(&event).await {
                ChatOutcome::Success => status_response(StatusCode::OK, "success"),
                ChatOutcome::Ignored(status) => status_response(StatusCode::OK, status),
            },
            InboundEvent::Ignored(status) => {
                tracing::debug!(status = %status, "Inbound event skipped");
                status_response(StatusCode::OK, status)
            }
            InboundEvent::Unrecognized => {
                tracing::warn!("Unrecognized webhook payload");
                status_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unrecognized payload")
            }
        }
    }
    .instrument(span)
    .await
}
