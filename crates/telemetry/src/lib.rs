//! Step tracing for OpsLoop.
//!
//! Every recorded reasoning step becomes a [`TraceEvent`]. Loops hand events
//! to a [`TraceSink`], which never blocks: a bounded channel feeds a single
//! collector task, and events that do not fit are counted and dropped. The
//! collector fans events out to [`TraceExporter`]s such as the in-memory
//! [`TraceCollector`] behind `/v1/traces`.

pub mod collector;
pub mod model;
pub mod sink;

pub use collector::{PhaseSummary, TraceCollector, TraceSummary};
pub use model::{TraceEvent, TraceOutcome};
pub use sink::{LogExporter, TraceExporter, TraceSink};
