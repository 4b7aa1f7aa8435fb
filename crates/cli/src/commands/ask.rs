//! `opsloop ask`: one query, one loop, printed outcome.

use std::time::Duration;

use opsloop_config::AppConfig;
use opsloop_core::InvocationResult;
use opsloop_runtime::{Budget, FailureReport, FinalAnswer, build_supervisor_with_backend};

pub struct AskRequest {
    pub query: String,
    pub max_steps: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub offline: bool,
    pub json: bool,
}

pub async fn run(config: AppConfig, request: AskRequest) -> Result<(), Box<dyn std::error::Error>> {
    if !request.offline && !config.has_api_key() {
        tracing::warn!(
            base_url = %config.inference.base_url,
            "No API key configured; set OPSLOOP_API_KEY if the endpoint needs one"
        );
    }

    let backend = super::backend(&config, request.offline);
    let supervisor = build_supervisor_with_backend(&config, backend)?;

    let defaults = supervisor.default_budget();
    let budget = Budget::new(
        request.max_steps.unwrap_or(defaults.max_steps),
        request
            .deadline_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.deadline),
    );

    match supervisor.submit_request(request.query, budget).await {
        Ok(answer) => {
            if request.json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
            Ok(())
        }
        Err(report) => {
            if request.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_failure(&report);
            }
            Err(report.into())
        }
    }
}

fn print_answer(answer: &FinalAnswer) {
    println!("{}", answer.answer);
    let actions = answer.actions_taken();
    if !actions.is_empty() {
        println!();
        println!("Actions taken:");
        for action in actions {
            let status = match &action.result {
                Some(InvocationResult::Ok(_)) => "ok".to_string(),
                Some(InvocationResult::Err(e)) => format!("failed: {e}"),
                None => "pending".to_string(),
            };
            println!("  - {} {} ({status}, {}ms)", action.name, action.arguments, action.elapsed_ms);
        }
    }
    println!();
    println!(
        "{} think steps in {}ms (request {})",
        answer.think_steps, answer.elapsed_ms, answer.request_id
    );
}

fn print_failure(report: &FailureReport) {
    eprintln!("Request {} ended without an answer: {}", report.request_id, report.message);
    for step in &report.history {
        eprintln!("  [{}] {}: {}", step.seq, step.phase, step.output);
    }
}
