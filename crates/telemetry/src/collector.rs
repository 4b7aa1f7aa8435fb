//! In-memory trace aggregation.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use opsloop_core::{RequestId, StepPhase};
use serde::Serialize;

use crate::model::{TraceEvent, TraceOutcome};
use crate::sink::TraceExporter;

/// Aggregated counters for one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: Option<StepPhase>,
    pub count: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
}

/// Everything `/v1/traces` reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceSummary {
    pub total_events: u64,
    pub dropped_events: u64,
    pub phases: Vec<PhaseSummary>,
    /// Loop aborts by reason kind
    pub aborts: HashMap<String, u64>,
    /// Requests with retained events
    pub tracked_requests: usize,
}

#[derive(Debug, Default)]
struct PhaseTotals {
    count: u64,
    failures: u64,
    total_ms: u64,
}

#[derive(Debug, Default)]
struct CollectorState {
    total_events: u64,
    phases: HashMap<StepPhase, PhaseTotals>,
    aborts: HashMap<String, u64>,
    /// Retained events per request, oldest request first
    recent: HashMap<RequestId, VecDeque<TraceEvent>>,
    order: VecDeque<RequestId>,
}

/// Thread-safe trace aggregator.
///
/// Keeps running totals for all events and the most recent events of the
/// most recent requests.
pub struct TraceCollector {
    state: RwLock<CollectorState>,
    max_requests: usize,
    max_events_per_request: usize,
}

const PHASE_ORDER: [StepPhase; 4] = [
    StepPhase::Think,
    StepPhase::Act,
    StepPhase::Observe,
    StepPhase::Final,
];

impl TraceCollector {
    pub fn new(max_requests: usize, max_events_per_request: usize) -> Self {
        Self {
            state: RwLock::new(CollectorState::default()),
            max_requests: max_requests.max(1),
            max_events_per_request: max_events_per_request.max(1),
        }
    }

    pub fn record(&self, event: &TraceEvent) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.total_events += 1;

        if let TraceOutcome::Aborted { reason } = &event.outcome {
            *state.aborts.entry(reason.clone()).or_default() += 1;
        } else {
            let totals = state.phases.entry(event.phase).or_default();
            totals.count += 1;
            totals.total_ms += event.duration_ms;
            if event.outcome.is_failure() {
                totals.failures += 1;
            }
        }

        if !state.recent.contains_key(&event.request_id) {
            if state.order.len() >= self.max_requests {
                if let Some(oldest) = state.order.pop_front() {
                    state.recent.remove(&oldest);
                }
            }
            state.order.push_back(event.request_id);
        }
        let events = state.recent.entry(event.request_id).or_default();
        if events.len() >= self.max_events_per_request {
            events.pop_front();
        }
        events.push_back(event.clone());
    }

    /// Retained events for one request, oldest first.
    pub fn events_for(&self, request_id: &RequestId) -> Vec<TraceEvent> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .recent
            .get(request_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Summary including the sink's drop count.
    pub fn summary(&self, dropped_events: u64) -> TraceSummary {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let phases = PHASE_ORDER
            .iter()
            .filter_map(|phase| {
                state.phases.get(phase).map(|t| PhaseSummary {
                    phase: Some(*phase),
                    count: t.count,
                    failures: t.failures,
                    avg_duration_ms: if t.count == 0 {
                        0.0
                    } else {
                        t.total_ms as f64 / t.count as f64
                    },
                })
            })
            .collect();

        TraceSummary {
            total_events: state.total_events,
            dropped_events,
            phases,
            aborts: state.aborts.clone(),
            tracked_requests: state.recent.len(),
        }
    }
}

impl TraceExporter for TraceCollector {
    fn export(&self, event: &TraceEvent) {
        self.record(event);
    }
}
