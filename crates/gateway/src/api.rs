//! `/v1` endpoints: queries, live loops, tools and traces.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use opsloop_core::{AbortReason, ReasoningStep, RequestId, ToolDefinition, ToolInvocation};
use opsloop_inference::BatcherSnapshot;
use opsloop_runtime::{Budget, FailureReport, FinalAnswer, LoopSnapshot};
use opsloop_telemetry::{TraceEvent, TraceSummary};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::GatewayState;
use crate::validation::validate_query;

pub type SharedState = Arc<GatewayState>;

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .route("/loops", get(list_loops_handler))
        .route("/loops/{id}", delete(cancel_loop_handler))
        .route("/tools", get(list_tools_handler))
        .route("/traces", get(trace_summary_handler))
        .route("/traces/{id}", get(request_trace_handler))
        .with_state(state)
}

// ── Request / response types ──

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub request_id: RequestId,
    pub response: String,
    pub actions_taken: Vec<ToolInvocation>,
    pub think_steps: u32,
    pub latency_ms: u64,
    pub history: Vec<ReasoningStep>,
}

impl From<FinalAnswer> for QueryResponse {
    fn from(answer: FinalAnswer) -> Self {
        let actions_taken = answer.actions_taken().into_iter().cloned().collect();
        Self {
            request_id: answer.request_id,
            response: answer.answer,
            actions_taken,
            think_steps: answer.think_steps,
            latency_ms: answer.elapsed_ms,
            history: answer.history,
        }
    }
}

/// Body returned when a loop ends without an answer.
#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub request_id: RequestId,
    pub error: &'static str,
    pub message: String,
    pub reason: AbortReason,
    pub latency_ms: u64,
    pub history: Vec<ReasoningStep>,
}

impl From<FailureReport> for FailureResponse {
    fn from(report: FailureReport) -> Self {
        Self {
            request_id: report.request_id,
            error: report.reason.kind(),
            message: report.message,
            reason: report.reason,
            latency_ms: report.elapsed_ms,
            history: report.history,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

fn error(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct LoopList {
    pub count: usize,
    pub loops: Vec<LoopSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ToolList {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
pub struct TraceReport {
    pub summary: TraceSummary,
    pub batcher: BatcherSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RequestTrace {
    pub request_id: RequestId,
    pub events: Vec<TraceEvent>,
}

/// HTTP status for a loop that ended with `reason`.
pub fn status_for(reason: &AbortReason) -> StatusCode {
    match reason {
        AbortReason::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        AbortReason::StepLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AbortReason::InferenceFailure { .. } | AbortReason::ToolFailureLimitExceeded { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AbortReason::Cancelled => StatusCode::CONFLICT,
        AbortReason::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Handlers ──

async fn query_handler(
    State(state): State<SharedState>,
    Json(req): Json<QueryRequest>,
) -> Response {
    if let Err(rejection) = validate_query(&req.query, state.max_query_length) {
        warn!(reason = %rejection, "Query rejected");
        return error(StatusCode::BAD_REQUEST, "invalid_query", rejection.to_string());
    }
    if req.max_steps == Some(0) {
        return error(
            StatusCode::BAD_REQUEST,
            "invalid_budget",
            "max_steps must be at least 1",
        );
    }

    let defaults = state.supervisor.default_budget();
    let budget = Budget::new(
        req.max_steps.unwrap_or(defaults.max_steps),
        req.deadline_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.deadline),
    );

    let handle = state.supervisor.accept(req.query, budget);
    let id = handle.id;
    info!(request_id = %id, "Query accepted");

    match handle.outcome().await {
        Ok(answer) => {
            info!(
                request_id = %id,
                think_steps = answer.think_steps,
                latency_ms = answer.elapsed_ms,
                "Query answered"
            );
            Json(QueryResponse::from(answer)).into_response()
        }
        Err(report) => {
            let status = status_for(&report.reason);
            warn!(
                request_id = %id,
                reason = report.reason.kind(),
                status = status.as_u16(),
                "Query failed"
            );
            (status, Json(FailureResponse::from(report))).into_response()
        }
    }
}

async fn list_loops_handler(State(state): State<SharedState>) -> Json<LoopList> {
    let loops = state.supervisor.snapshot();
    Json(LoopList {
        count: loops.len(),
        loops,
    })
}

async fn cancel_loop_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<RequestId>() else {
        return error(StatusCode::BAD_REQUEST, "invalid_id", format!("not a request id: {id}"));
    };
    if state.supervisor.cancel(&id) {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "request_id": id, "cancelled": true })),
        )
            .into_response()
    } else {
        error(StatusCode::NOT_FOUND, "not_found", format!("no live loop {id}"))
    }
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolList> {
    Json(ToolList {
        tools: state.supervisor.tool_definitions(),
    })
}

async fn trace_summary_handler(State(state): State<SharedState>) -> Json<TraceReport> {
    Json(TraceReport {
        summary: state.supervisor.trace_summary(),
        batcher: state.supervisor.batcher_stats(),
    })
}

async fn request_trace_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<RequestId>() else {
        return error(StatusCode::BAD_REQUEST, "invalid_id", format!("not a request id: {id}"));
    };
    let events = state.supervisor.events_for(&id);
    if events.is_empty() {
        return error(StatusCode::NOT_FOUND, "not_found", format!("no trace for {id}"));
    }
    Json(RequestTrace {
        request_id: id,
        events,
    })
    .into_response()
}
