//! Append-only JSONL event sink.
//!
//! Port of nanobot's `metrics/collector.py` `MetricsCollector`. Each record
//! type gets its own file; writes open-append-close per call so a crash
//! mid-write never corrupts anything but the last line, and reads skip
//! lines that fail to parse rather than failing the whole read.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::models::{LlmEvent, SessionSummary, ToolEvent};

const TOOL_EVENTS_FILE: &str = "tool_events.jsonl";
const LLM_EVENTS_FILE: &str = "llm_events.jsonl";
const SESSIONS_FILE: &str = "sessions.jsonl";

/// Collects and reads back metrics events.
///
/// When `enabled` is `false`, every record/read call is a no-op (mirrors
/// the teacher's pattern of short-circuiting disabled features rather than
/// threading an `if enabled` check through every call site).
pub struct MetricsCollector {
    dir: PathBuf,
    enabled: bool,
}

impl MetricsCollector {
    /// Create a collector writing under `metrics_dir`.
    ///
    /// If `metrics_dir` is `None`, defaults to `~/.nanobot/metrics`.
    pub fn new(metrics_dir: Option<PathBuf>, enabled: bool) -> Self {
        let dir = metrics_dir
            .unwrap_or_else(|| oxibot_core::utils::get_data_path().join("metrics"));
        Self { dir, enabled }
    }

    /// The directory events are written under.
    pub fn metrics_dir(&self) -> &Path {
        &self.dir
    }

    /// Whether this collector actually records events.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn record_tool_event(&self, event: &ToolEvent) {
        if !self.enabled {
            return;
        }
        self.append(TOOL_EVENTS_FILE, event).await;
    }

    pub async fn record_llm_event(&self, event: &LlmEvent) {
        if !self.enabled {
            return;
        }
        self.append(LLM_EVENTS_FILE, event).await;
    }

    pub async fn record_session(&self, summary: &SessionSummary) {
        if !self.enabled {
            return;
        }
        self.append(SESSIONS_FILE, summary).await;
    }

    pub async fn read_tool_events(&self, limit: usize) -> Vec<ToolEvent> {
        self.read(TOOL_EVENTS_FILE, limit).await
    }

    pub async fn read_llm_events(&self, limit: usize) -> Vec<LlmEvent> {
        self.read(LLM_EVENTS_FILE, limit).await
    }

    pub async fn read_sessions(&self, limit: usize) -> Vec<SessionSummary> {
        self.read(SESSIONS_FILE, limit).await
    }

    /// Delete all three event files. Used by `oxibot metrics reset`.
    pub async fn reset(&self) {
        for file in [TOOL_EVENTS_FILE, LLM_EVENTS_FILE, SESSIONS_FILE] {
            let path = self.dir.join(file);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, path = %path.display(), "failed to remove metrics file");
                }
            }
        }
    }

    async fn append<T: serde::Serialize>(&self, file_name: &str, data: &T) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(error = %e, dir = %self.dir.display(), "failed to create metrics directory");
            return;
        }

        let line = match serde_json::to_string(data) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to serialize metrics event");
                return;
            }
        };

        let path = self.dir.join(file_name);
        let opened = OpenOptions::new().create(true).append(true).open(&path).await;
        match opened {
            Ok(mut f) => {
                if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(error = %e, path = %path.display(), "failed to append metrics event");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to open metrics file");
            }
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, file_name: &str, limit: usize) -> Vec<T> {
        let path = self.dir.join(file_name);
        if !path.exists() {
            return Vec::new();
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read metrics file");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(v) => records.push(v),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "skipping corrupt metrics line");
                }
            }
        }

        if limit > 0 && records.len() > limit {
            let start = records.len() - limit;
            records.split_off(start)
        } else {
            records
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool_event() -> ToolEvent {
        ToolEvent {
            ts: "2026-01-01T00:00:00Z".into(),
            session_id: "cli:default".into(),
            tool_name: "read_file".into(),
            tool_success: true,
            latency_ms: 5,
            input_size: 10,
            output_size: 20,
            error: None,
            iteration: 0,
        }
    }

    #[tokio::test]
    async fn test_disabled_collector_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), false);
        collector.record_tool_event(&sample_tool_event()).await;
        assert!(collector.read_tool_events(0).await.is_empty());
        assert!(!dir.path().join("tool_events.jsonl").exists());
    }

    #[tokio::test]
    async fn test_record_and_read_tool_events() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        collector.record_tool_event(&sample_tool_event()).await;
        collector.record_tool_event(&sample_tool_event()).await;

        let events = collector.read_tool_events(0).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tool_name, "read_file");
    }

    #[tokio::test]
    async fn test_read_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);
        assert!(collector.read_tool_events(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);
        collector.record_tool_event(&sample_tool_event()).await;

        let path = dir.path().join("tool_events.jsonl");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("not json at all\n");
        tokio::fs::write(&path, content).await.unwrap();

        let events = collector.read_tool_events(0).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_read_applies_limit() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);

        for i in 0..5 {
            let mut ev = sample_tool_event();
            ev.iteration = i;
            collector.record_tool_event(&ev).await;
        }

        let events = collector.read_tool_events(2).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].iteration, 3);
        assert_eq!(events[1].iteration, 4);
    }

    #[tokio::test]
    async fn test_metrics_dir_accessor() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(Some(dir.path().to_path_buf()), true);
        assert_eq!(collector.metrics_dir(), dir.path());
    }
}
