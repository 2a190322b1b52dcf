//! Metrics collector — append-only JSONL event log + report aggregation.
//!
//! Port of nanobot's `metrics/` package. The agent loop and cron service
//! record [`models::ToolEvent`], [`models::LlmEvent`], and
//! [`models::SessionSummary`] records through a shared [`collector::MetricsCollector`];
//! the `metrics` CLI subcommand reads them back via [`report`].

pub mod collector;
pub mod models;
pub mod report;

pub use collector::MetricsCollector;
pub use models::{LlmEvent, SessionSummary, ToolEvent};
