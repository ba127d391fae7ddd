// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP control plane for Test-Probe.
//!
//! A thin mapping from the REST surface onto [`SchedulerHandle`] asks.
//! All state lives behind the scheduler; handlers translate replies and
//! errors into status codes and JSON bodies.

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use probe_core::{QueueStatus, TestId, TestStatus};
use probe_scheduler::{CancelReply, SchedulerError, SchedulerHandle, StartReply};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Client to the guardian-supervised scheduler.
    pub scheduler: SchedulerHandle,
}

/// Body of `POST /start`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Id from a prior `POST /initialize`.
    pub test_id: TestId,
    /// Bucket URI holding features and the topic-directive manifest.
    pub bucket: String,
    /// Optional tag passed through to the scenario runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

/// Body of `POST /start` responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// Whether the test was accepted.
    pub accepted: bool,
    /// Echo of the request's test type on acceptance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

/// Body of `POST /initialize` responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The fresh test id.
    pub test_id: TestId,
}

/// Body of `DELETE /{testId}` responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether a cancellation was applied or requested by this call.
    pub cancelled: bool,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Query parameters of `GET /queue`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueQuery {
    /// Include this record's summary in the reply.
    pub test_id: Option<TestId>,
}

/// Handler-level error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    /// Status code to reply with.
    pub status: StatusCode,
    /// Message for the JSON error body.
    pub message: String,
}

impl ApiError {
    /// Build an error reply.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => {
                ApiError::new(StatusCode::NOT_FOUND, format!("test {id} not found"))
            }
            // Admission/ask pressure surfaces as transient unavailability.
            SchedulerError::Unavailable | SchedulerError::AskTimeout => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
        }
    }
}

/// Build the Axum router with all control-plane routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/initialize", post(cmd_initialize))
        .route("/start", post(cmd_start))
        .route("/status/{test_id}", get(cmd_status))
        .route("/queue", get(cmd_queue))
        .route("/{test_id}", delete(cmd_cancel))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "contract_version": probe_core::CONTRACT_VERSION,
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn cmd_initialize(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<InitializeResponse>), ApiError> {
    let test_id = state.scheduler.initialize().await?;
    info!(target: "probe.daemon", test_id = %test_id, "test initialised");
    Ok((StatusCode::CREATED, Json(InitializeResponse { test_id })))
}

async fn cmd_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let reply = state
        .scheduler
        .start(req.test_id, req.bucket, req.test_type.clone())
        .await?;

    match reply {
        StartReply::Accepted => {
            info!(target: "probe.daemon", test_id = %req.test_id, "test started");
            Ok((
                StatusCode::ACCEPTED,
                Json(StartResponse {
                    accepted: true,
                    test_type: req.test_type,
                    message: "test accepted".into(),
                }),
            ))
        }
        StartReply::Rejected { reason } => Ok((
            StatusCode::BAD_REQUEST,
            Json(StartResponse {
                accepted: false,
                test_type: None,
                message: reason,
            }),
        )),
    }
}

async fn cmd_status(
    AxPath(test_id): AxPath<TestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TestStatus>, ApiError> {
    let status = state.scheduler.status(test_id).await?;
    Ok(Json(status))
}

async fn cmd_queue(
    Query(query): Query<QueueQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStatus>, ApiError> {
    let status = state.scheduler.queue_status(query.test_id).await?;
    Ok(Json(status))
}

async fn cmd_cancel(
    AxPath(test_id): AxPath<TestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CancelResponse>, ApiError> {
    let reply = state.scheduler.cancel(test_id).await?;
    let response = match reply {
        CancelReply::Cancelled => {
            info!(target: "probe.daemon", test_id = %test_id, "cancellation requested");
            CancelResponse {
                cancelled: true,
                message: None,
            }
        }
        CancelReply::NoOp => CancelResponse {
            cancelled: false,
            message: Some("test is already in a terminal state".into()),
        },
    };
    Ok(Json(response))
}
