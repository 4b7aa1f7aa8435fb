//! End-to-end tests for the OpsLoop runtime.
//!
//! These run the whole pipeline from a query to its outcome: configuration,
//! knowledge loading, the inference batcher, tools, the supervisor and the
//! HTTP gateway, with a scripted backend standing in for the model.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use opsloop_config::{AppConfig, SupervisorConfig};
use opsloop_core::{
    AbortReason, Generation, InferenceBackend, LoopStatus, Role, StepPhase, Tool, ToolError,
    ToolOutput, ToolRegistry,
};
use opsloop_inference::scripted::offline_operator;
use opsloop_inference::{BatcherConfig, InferenceBatcher, ScriptedBackend};
use opsloop_runtime::{
    Budget, LoopPolicy, LoopResources, LoopSupervisor, build_supervisor_with_backend,
};
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────────

fn supervisor(config: &AppConfig, backend: ScriptedBackend) -> LoopSupervisor {
    let backend: Arc<dyn InferenceBackend> = Arc::new(backend);
    build_supervisor_with_backend(config, backend).unwrap()
}

fn budget(max_steps: u32) -> Budget {
    Budget::new(max_steps, Duration::from_secs(30))
}

/// A tool that runs until released, so a test can act while a loop is busy.
struct GateTool {
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
    finished: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Tool for GateTool {
    fn name(&self) -> &str {
        "drain_node"
    }

    fn description(&self) -> &str {
        "Drain a node before maintenance"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "node": { "type": "string" } },
            "required": ["node"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ToolOutput::text(format!("drained {}", arguments["node"])))
    }
}

// ── Offline pipeline ─────────────────────────────────────────────────────

#[tokio::test]
async fn offline_operator_reports_degraded_staging() {
    let sup = supervisor(&AppConfig::default(), offline_operator());
    let answer = sup
        .submit_request("Is the staging cluster healthy?", budget(4))
        .await
        .unwrap();

    assert!(answer.answer.contains("DEGRADED"));
    assert_eq!(answer.think_steps, 2);
    let actions = answer.actions_taken();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].name, "get_cluster_status");
    assert_eq!(actions[0].arguments["cluster_id"], "staging");
    assert!(actions[0].succeeded());

    let phases: Vec<StepPhase> = answer.history.iter().map(|s| s.phase).collect();
    assert_eq!(phases, vec![StepPhase::Act, StepPhase::Observe, StepPhase::Final]);
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn unknown_cluster_is_observed_not_fatal() {
    let backend = ScriptedBackend::sequence(vec![
        Ok(Generation::tool_call(
            "get_cluster_status",
            serde_json::json!({"cluster_id": "qa"}),
        )),
        Ok(Generation::answer("There is no qa cluster.")),
    ]);
    let sup = supervisor(&AppConfig::default(), backend);
    let answer = sup.submit_request("is qa healthy?", budget(4)).await.unwrap();

    assert_eq!(answer.answer, "There is no qa cluster.");
    let actions = answer.actions_taken();
    assert!(!actions[0].succeeded());
}

// ── Knowledge ────────────────────────────────────────────────────────────

#[tokio::test]
async fn runbooks_reach_the_prompt_and_the_search_tool() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("disk-pressure.md"),
        "# Disk pressure\n\nWhen a node reports disk pressure, prune unused images \
         with crictl rmi --prune and check log rotation.",
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.knowledge.enabled = true;
    config.knowledge.directory = Some(dir.path().to_path_buf());

    let backend = ScriptedBackend::from_fn(|prompt| {
        let system = &prompt.messages[0];
        assert_eq!(system.role, Role::System);
        if prompt.messages.iter().any(|m| m.role == Role::Tool) {
            return Ok(Generation::answer("Prune images with crictl."));
        }
        assert!(system.content.contains("Relevant knowledge"));
        assert!(system.content.contains("crictl rmi --prune"));
        Ok(Generation::tool_call(
            "search_knowledge_base",
            serde_json::json!({"query": "disk pressure", "top_k": 1}),
        ))
    });
    let sup = supervisor(&config, backend);

    let names: Vec<String> = sup.tool_definitions().into_iter().map(|d| d.name).collect();
    assert!(names.contains(&"search_knowledge_base".to_string()));

    let answer = sup
        .submit_request("node has disk pressure, what now?", budget(4))
        .await
        .unwrap();
    assert_eq!(answer.answer, "Prune images with crictl.");

    let search = answer.actions_taken()[0].clone();
    assert!(search.succeeded());
    let observation = search.render_observation();
    assert!(observation.contains("disk-pressure.md"));
    assert!(observation.contains("\"found\": 1"));
}

// ── Batching ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_loops_share_batches() {
    let mut config = AppConfig::default();
    config.inference.max_batch_size = 4;
    config.inference.max_wait_ms = 200;

    let backend = Arc::new(ScriptedBackend::from_fn(|prompt| {
        let query = prompt.last_user_text().unwrap_or_default().to_string();
        Ok(Generation::answer(format!("answer to {query}")))
    }));
    let dyn_backend: Arc<dyn InferenceBackend> = backend.clone();
    let sup = Arc::new(build_supervisor_with_backend(&config, dyn_backend).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| sup.accept(format!("question {i}"), budget(2)))
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let answer = handle.outcome().await.unwrap();
        assert_eq!(answer.answer, format!("answer to question {i}"));
    }

    assert_eq!(backend.batch_sizes(), vec![4]);
    assert_eq!(sup.batcher_stats().requests_served, 4);
}

// ── Supervision ──────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_while_tool_runs_finishes_the_tool_then_stops() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let finished = Arc::new(AtomicBool::new(false));

    let mut tools = ToolRegistry::new();
    tools
        .register(Arc::new(GateTool {
            entered: entered.clone(),
            release: release.clone(),
            finished: finished.clone(),
        }))
        .unwrap();

    let backend: Arc<dyn InferenceBackend> = Arc::new(ScriptedBackend::sequence(vec![
        Ok(Generation::tool_call("drain_node", serde_json::json!({"node": "prod-node-2"}))),
        Ok(Generation::answer("never reached")),
    ]));
    let batcher = Arc::new(InferenceBatcher::new(
        backend,
        BatcherConfig {
            max_batch_size: 1,
            max_wait: Duration::from_millis(1),
            backend_timeout: Duration::from_secs(10),
            max_inflight_batches: 1,
        },
    ));
    let resources = LoopResources::new(batcher, Arc::new(tools), Arc::new(LoopPolicy::default()));
    let sup = LoopSupervisor::new(resources, SupervisorConfig::default(), budget(8));

    let handle = sup.accept("drain prod-node-2", budget(8));
    entered.notified().await;

    let running = sup.snapshot();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].status, LoopStatus::Running);
    assert_eq!(running[0].last_phase(), Some(StepPhase::Act));

    assert!(sup.cancel(&handle.id));
    release.notify_one();

    let report = handle.outcome().await.unwrap_err();
    assert_eq!(report.reason, AbortReason::Cancelled);
    assert!(finished.load(Ordering::SeqCst));
    let phases: Vec<StepPhase> = report.history.iter().map(|s| s.phase).collect();
    assert_eq!(phases, vec![StepPhase::Act, StepPhase::Observe]);
    assert!(sup.snapshot().is_empty());
}

#[tokio::test]
async fn trace_summary_counts_every_phase() {
    let sup = supervisor(&AppConfig::default(), offline_operator());
    sup.submit_request("is dev ok?", budget(4)).await.unwrap();
    sup.submit_request("is prod ok?", budget(4)).await.unwrap();

    let mut summary = sup.trace_summary();
    for _ in 0..50 {
        if summary.total_events == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        summary = sup.trace_summary();
    }
    assert_eq!(summary.total_events, 6);
    assert_eq!(summary.dropped_events, 0);
    assert_eq!(summary.tracked_requests, 2);
    let counts: Vec<(Option<StepPhase>, u64)> =
        summary.phases.iter().map(|p| (p.phase, p.count)).collect();
    assert_eq!(
        counts,
        vec![
            (Some(StepPhase::Act), 2),
            (Some(StepPhase::Observe), 2),
            (Some(StepPhase::Final), 2),
        ]
    );
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn gateway_answers_over_http() {
    let config = AppConfig::default();
    let sup = supervisor(&config, offline_operator());
    let state = Arc::new(opsloop_gateway::GatewayState::new(
        Arc::new(sup),
        config.gateway.max_query_length,
    ));
    let app = opsloop_gateway::build_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/query")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"query": "How is production doing?", "max_steps": 3}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["response"].as_str().unwrap().contains("HEALTHY"));
    assert_eq!(body["actions_taken"][0]["arguments"]["cluster_id"], "prod");
}
