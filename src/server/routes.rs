//! Axum route handlers for the orchestrator service.
//!
//! # Routes
//!
//! - `GET  /health`        — Returns `{"status": "ok", "version": ..., "service": ...}`
//! - `GET  /capabilities`  — The orchestrator's own `{id, name, capabilities}`
//! - `POST /negotiate`     — Always accepts
//! - `POST /execute`       — Runs the configured workflow on the request body

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::OrchestratorError;
use crate::orchestrator::{Orchestrator, WorkflowRequest};
use crate::pipeline::executor::DONE_STATUS;

/// Status token of a failed `/execute`.
pub const ERROR_STATUS: &str = "error";

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/negotiate", post(negotiate_handler))
        .route("/execute", post(execute_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": state.orchestrator.config().service.id,
    }))
}

/// GET /capabilities — the orchestrator described like any other agent.
async fn capabilities_handler(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.orchestrator.config().service;
    Json(json!({
        "id": service.id,
        "name": service.name,
        "capabilities": service.capabilities,
    }))
}

/// POST /negotiate — the orchestrator takes every job offered to it.
async fn negotiate_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "accept",
        "id": state.orchestrator.config().service.id,
    }))
}

/// POST /execute — run the configured workflow.
///
/// Request: any JSON value, used as the initial payload.
/// Success: `{status: "done", output, outputs, logs, agents_used, timestamp}`.
/// Failure: non-2xx `{status: "error", message, step, agent, logs}`.
async fn execute_handler(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let payload = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let workflow = state.orchestrator.config().workflow.clone();
    let request = WorkflowRequest::new(workflow).with_payload(payload);

    // Dropping the handler future (client gone) cancels in-flight calls.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.orchestrator.run_with_cancel(request, &cancel).await {
        Ok(report) => {
            tracing::info!(
                workflow_id = %report.workflow_id,
                steps = report.log.len(),
                "workflow finished"
            );
            Ok(Json(json!({
                "status": DONE_STATUS,
                "output": report.output,
                "outputs": report.outputs,
                "logs": report.log,
                "agents_used": report.agents_used,
                "workflow_status": report.status,
                "timestamp": report.finished_at.to_rfc3339(),
            })))
        }
        Err(err) => {
            tracing::warn!(error = %err, "workflow failed");
            Err((
                status_for(&err),
                Json(json!({
                    "status": ERROR_STATUS,
                    "message": err.to_string(),
                    "step": err.step(),
                    "agent": err.agent(),
                    "logs": err.log(),
                })),
            ))
        }
    }
}

fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::EmptyWorkflow
        | OrchestratorError::DuplicateStep { .. }
        | OrchestratorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OrchestratorError::NoAgents | OrchestratorError::Cancelled { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrchestratorError::Unmatched { .. } | OrchestratorError::NegotiationRejected { .. } => {
            StatusCode::CONFLICT
        }
        OrchestratorError::PipelineAborted { .. } => StatusCode::BAD_GATEWAY,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
