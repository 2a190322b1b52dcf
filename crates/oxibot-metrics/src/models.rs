//! Event and summary record types.
//!
//! Port of nanobot's `metrics/models.py` dataclasses. These are written to
//! disk as JSONL — one compact JSON object per line — so the field names
//! are plain snake_case, matching the original records exactly rather than
//! the camelCase convention used by `config.json`.

use serde::{Deserialize, Serialize};

/// A single tool invocation, recorded after the tool returns (success or
/// failure — failure never prevents the event from being recorded).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolEvent {
    pub ts: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_success: bool,
    pub latency_ms: u64,
    pub input_size: usize,
    pub output_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub iteration: u32,
}

/// A single LLM call, recorded after the response (or failure) is received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmEvent {
    pub ts: String,
    pub session_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub has_tool_calls: bool,
    pub num_tool_calls: u32,
    pub latency_ms: u64,
    pub iteration: u32,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

/// A completed conversation turn, recorded once processing finishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub success: bool,
    pub total_iterations: u32,
    pub total_tool_calls: u32,
    pub total_llm_calls: u32,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub model: String,
}
