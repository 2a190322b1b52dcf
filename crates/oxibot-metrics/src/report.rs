//! Aggregate reports over recorded events.
//!
//! Port of nanobot's `metrics/report.py`. Time windows are applied by
//! comparing the RFC3339 `ts` string lexicographically against a cutoff —
//! this only works because every timestamp in these files is stamped by
//! the same `chrono::Utc::now().to_rfc3339()` call, so all representations
//! share format and offset.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::collector::MetricsCollector;
use crate::models::{SessionSummary, ToolEvent};

fn cutoff(hours: i64) -> String {
    (Utc::now() - Duration::hours(hours)).to_rfc3339()
}

fn since<'a, T>(events: &'a [T], hours: i64, ts: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let cut = cutoff(hours);
    events.iter().filter(|e| ts(e).as_ref() >= cut.as_str()).collect()
}

#[derive(Debug, Serialize, Default)]
pub struct SummaryReport {
    pub period_hours: i64,
    pub overview: SummaryOverview,
    pub tokens: SummaryTokens,
    pub tools: SummaryTools,
    pub llm_calls: u64,
}

#[derive(Debug, Serialize, Default)]
pub struct SummaryOverview {
    pub total_sessions: u64,
    pub success_rate: f64,
    pub avg_iterations_per_session: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct SummaryTokens {
    pub total_prompt: u64,
    pub total_completion: u64,
    pub total: u64,
    pub avg_per_session: f64,
    pub per_success: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct SummaryTools {
    pub total_calls: u64,
    pub success_rate: f64,
}

/// Overview of gateway activity in the last `hours`.
pub async fn summary_report(collector: &MetricsCollector, hours: i64) -> SummaryReport {
    let sessions = collector.read_sessions(0).await;
    let tool_events = collector.read_tool_events(0).await;
    let llm_events = collector.read_llm_events(0).await;

    let sessions = since(&sessions, hours, |s| &s.started_at);
    let tool_events = since(&tool_events, hours, |e| &e.ts);
    let llm_events = since(&llm_events, hours, |e| &e.ts);

    let total_sessions = sessions.len() as u64;
    let successes = sessions.iter().filter(|s| s.success).count() as u64;
    let success_rate = ratio(successes, total_sessions);

    let total_iterations: u64 = sessions.iter().map(|s| s.total_iterations as u64).sum();
    let avg_iterations = avg(total_iterations, total_sessions);

    let total_prompt: u64 = sessions.iter().map(|s| s.total_prompt_tokens).sum();
    let total_completion: u64 = sessions.iter().map(|s| s.total_completion_tokens).sum();
    let total_tokens: u64 = sessions.iter().map(|s| s.total_tokens).sum();
    let tokens_per_success: u64 = sessions
        .iter()
        .filter(|s| s.success)
        .map(|s| s.total_tokens)
        .sum();

    let total_calls = tool_events.len() as u64;
    let tool_successes = tool_events.iter().filter(|e| e.tool_success).count() as u64;

    SummaryReport {
        period_hours: hours,
        overview: SummaryOverview {
            total_sessions,
            success_rate,
            avg_iterations_per_session: avg_iterations,
        },
        tokens: SummaryTokens {
            total_prompt,
            total_completion,
            total: total_tokens,
            avg_per_session: avg(total_tokens, total_sessions),
            per_success: avg(tokens_per_success, successes),
        },
        tools: SummaryTools {
            total_calls,
            success_rate: ratio(tool_successes, total_calls),
        },
        llm_calls: llm_events.len() as u64,
    }
}

#[derive(Debug, Serialize)]
pub struct ToolReportEntry {
    pub tool: String,
    pub calls: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_input_size: f64,
    pub avg_output_size: f64,
    pub top_errors: Vec<(String, u64)>,
}

/// Per-tool call stats in the last `hours`, sorted by call count descending.
pub async fn tool_report(collector: &MetricsCollector, hours: i64) -> Vec<ToolReportEntry> {
    let all = collector.read_tool_events(0).await;
    let recent = since(&all, hours, |e| &e.ts);

    let mut by_tool: HashMap<&str, Vec<&ToolEvent>> = HashMap::new();
    for e in &recent {
        by_tool.entry(e.tool_name.as_str()).or_default().push(e);
    }

    let mut entries: Vec<ToolReportEntry> = by_tool
        .into_iter()
        .map(|(tool, events)| {
            let calls = events.len() as u64;
            let successes = events.iter().filter(|e| e.tool_success).count() as u64;
            let sum_latency: u64 = events.iter().map(|e| e.latency_ms).sum();
            let sum_input: u64 = events.iter().map(|e| e.input_size as u64).sum();
            let sum_output: u64 = events.iter().map(|e| e.output_size as u64).sum();

            let mut error_counts: HashMap<String, u64> = HashMap::new();
            for e in &events {
                if let Some(err) = &e.error {
                    let truncated: String = err.chars().take(120).collect();
                    *error_counts.entry(truncated).or_insert(0) += 1;
                }
            }
            let mut top_errors: Vec<(String, u64)> = error_counts.into_iter().collect();
            top_errors.sort_by(|a, b| b.1.cmp(&a.1));
            top_errors.truncate(3);

            ToolReportEntry {
                tool: tool.to_string(),
                calls,
                success_rate: ratio(successes, calls),
                avg_latency_ms: avg(sum_latency, calls),
                avg_input_size: avg(sum_input, calls),
                avg_output_size: avg(sum_output, calls),
                top_errors,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.calls.cmp(&a.calls));
    entries
}

/// The last `last_n` sessions, newest first.
pub async fn session_report(collector: &MetricsCollector, last_n: usize) -> Vec<SessionSummary> {
    let mut sessions = collector.read_sessions(last_n).await;
    sessions.reverse();
    sessions
}

#[derive(Debug, Serialize)]
pub struct ModelReportEntry {
    pub model: String,
    pub sessions: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub tokens_per_session: f64,
    pub tokens_per_success: f64,
}

/// Per-model session stats in the last `hours` (default window: 1 week),
/// sorted alphabetically by model name.
pub async fn model_report(collector: &MetricsCollector, hours: i64) -> Vec<ModelReportEntry> {
    let all = collector.read_sessions(0).await;
    let recent = since(&all, hours, |s| &s.started_at);

    let mut by_model: HashMap<&str, Vec<&SessionSummary>> = HashMap::new();
    for s in &recent {
        by_model.entry(s.model.as_str()).or_default().push(s);
    }

    let mut entries: Vec<ModelReportEntry> = by_model
        .into_iter()
        .map(|(model, sessions)| {
            let count = sessions.len() as u64;
            let successes = sessions.iter().filter(|s| s.success).count() as u64;
            let total_tokens: u64 = sessions.iter().map(|s| s.total_tokens).sum();
            let tokens_per_success: u64 = sessions
                .iter()
                .filter(|s| s.success)
                .map(|s| s.total_tokens)
                .sum();

            ModelReportEntry {
                model: model.to_string(),
                sessions: count,
                success_rate: ratio(successes, count),
                total_tokens,
                tokens_per_session: avg(total_tokens, count),
                tokens_per_success: avg(tokens_per_success, successes),
            }
        })
        .collect();

    entries.sort_by(|a, b| a.model.cmp(&b.model));
    entries
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

fn avg(total: u64, count: u64) -> f64 {
    ratio(total, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolEvent;

    fn ev(tool: &str, success: bool, error: Option<&str>) -> ToolEvent {
        ToolEvent {
            ts: Utc::now().to_rfc3339(),
            session_id: "cli:default".into(),
            tool_name: tool.into(),
            tool_success: success,
            latency_ms: 10,
            input_size: 5,
            output_size: 5,
            error: error.map(|s| s.to_string()),
            iteration: 0,
        }
    }

    fn sess(model: &str, success: bool, tokens: u64) -> SessionSummary {
        SessionSummary {
            session_id: "cli:default".into(),
            started_at: Utc::now().to_rfc3339(),
            ended_at: Utc::now().to_rfc3339(),
            duration_ms: 100,
            success,
            total_iterations: 2,
            total_tool_calls: 1,
            total_llm_calls: 2,
            total_prompt_tokens: tokens / 2,
            total_completion_tokens: tokens / 2,
            total_tokens: tokens,
            tools_used: vec![],
            failure_reason: None,
            task_type: None,
            channel: "cli".into(),
            model: model.into(),
        }
    }

    #[tokio::test]
    async fn test_summary_report_empty() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);
        let report = summary_report(&collector, 24).await;
        assert_eq!(report.overview.total_sessions, 0);
        assert_eq!(report.overview.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_summary_report_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        collector.record_session(&sess("gpt-4o", true, 100)).await;
        collector.record_session(&sess("gpt-4o", false, 50)).await;

        let report = summary_report(&collector, 24).await;
        assert_eq!(report.overview.total_sessions, 2);
        assert_eq!(report.overview.success_rate, 0.5);
        assert_eq!(report.tokens.total, 150);
    }

    #[tokio::test]
    async fn test_tool_report_sorted_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        collector.record_tool_event(&ev("exec", false, Some("boom"))).await;
        collector.record_tool_event(&ev("exec", false, Some("boom"))).await;
        collector.record_tool_event(&ev("read_file", true, None)).await;

        let report = tool_report(&collector, 24).await;
        assert_eq!(report[0].tool, "exec");
        assert_eq!(report[0].calls, 2);
        assert_eq!(report[0].success_rate, 0.0);
        assert_eq!(report[0].top_errors[0], ("boom".to_string(), 2));
    }

    #[tokio::test]
    async fn test_session_report_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        let mut first = sess("gpt-4o", true, 10);
        first.session_id = "first".into();
        let mut second = sess("gpt-4o", true, 10);
        second.session_id = "second".into();

        collector.record_session(&first).await;
        collector.record_session(&second).await;

        let report = session_report(&collector, 20).await;
        assert_eq!(report[0].session_id, "second");
        assert_eq!(report[1].session_id, "first");
    }

    #[tokio::test]
    async fn test_model_report_alphabetical() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        collector.record_session(&sess("openai/gpt-4o", true, 100)).await;
        collector.record_session(&sess("anthropic/claude", true, 200)).await;

        let report = model_report(&collector, 168).await;
        assert_eq!(report[0].model, "anthropic/claude");
        assert_eq!(report[1].model, "openai/gpt-4o");
    }
}
