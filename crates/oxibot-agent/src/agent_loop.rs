//! Agent loop — the LLM ↔ tool-calling main loop.
//!
//! Port of nanobot's `agent/loop.py`.
//! Receives inbound messages, builds context, calls the LLM, dispatches
//! tool calls, and publishes outbound responses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use oxibot_core::bus::queue::MessageBus;
use oxibot_core::bus::types::{InboundMessage, OutboundMessage};
use oxibot_core::session::manager::SessionManager;
use oxibot_core::types::{Message, ToolCall};
use oxibot_metrics::{LlmEvent, MetricsCollector, SessionSummary, ToolEvent};
use oxibot_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::subagent::SubagentManager;
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Default number of most-recent non-system turns kept in the prompt window.
const DEFAULT_MEMORY_WINDOW: usize = 50;

/// Configuration for the exec tool.
#[derive(Clone, Debug)]
pub struct ExecToolConfig {
    /// Timeout in seconds (default 60).
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    /// Message bus for inbound/outbound messages.
    bus: Arc<MessageBus>,
    /// LLM provider.
    provider: Arc<dyn LlmProvider>,
    /// Workspace root.
    workspace: PathBuf,
    /// Model to use (overrides provider default if set).
    model: String,
    /// Max LLM ↔ tool iterations per message.
    max_iterations: usize,
    /// Number of most-recent non-system turns retained in the prompt window.
    memory_window: usize,
    /// LLM request config (temperature, max_tokens).
    request_config: LlmRequestConfig,
    /// Tool registry.
    tools: ToolRegistry,
    /// Context builder.
    context: ContextBuilder,
    /// Session manager.
    sessions: SessionManager,
    /// Reference to the message tool (for set_context).
    message_tool: Arc<MessageTool>,
    /// Spawn tool reference (for set_context).
    spawn_tool: Arc<SpawnTool>,
    /// Subagent manager (also held by SpawnTool; kept for direct access).
    #[allow(dead_code)]
    subagent_manager: Arc<SubagentManager>,
    /// Metrics sink for tool/LLM/session events.
    metrics: Arc<MetricsCollector>,
    /// Cooperative shutdown signal — wakes a blocked `run()` loop.
    shutdown: Arc<Notify>,
    /// Set by `stop()`; checked between iterations (never mid-tool-call).
    stopping: Arc<AtomicBool>,
}

impl AgentLoop {
    /// Create a new agent loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        model: Option<String>,
        max_iterations: Option<usize>,
        memory_window: Option<usize>,
        request_config: Option<LlmRequestConfig>,
        brave_api_key: Option<String>,
        exec_config: Option<ExecToolConfig>,
        restrict_to_workspace: bool,
        session_manager: Option<SessionManager>,
        agent_name: Option<String>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let memory_window = memory_window.unwrap_or(DEFAULT_MEMORY_WINDOW);
        let request_config = request_config.unwrap_or_default();
        let exec_config = exec_config.unwrap_or_default();
        let agent_name = agent_name.unwrap_or_else(|| "Oxibot".into());
        let sessions =
            session_manager.unwrap_or_else(|| SessionManager::new(None).expect("failed to create session manager"));

        let context = ContextBuilder::new(&workspace, &agent_name);

        // Build tool registry
        let mut tools = ToolRegistry::new();
        let allowed_dir = if restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            workspace.clone(),
            Some(exec_config.timeout),
            restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let message_tool = Arc::new(MessageTool::new(None));
        tools.register(message_tool.clone());

        // Subagent manager + spawn tool
        let subagent_manager = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace.clone(),
            bus.clone(),
            model.clone(),
            brave_api_key,
            exec_config,
            restrict_to_workspace,
            request_config.clone(),
        ));

        let spawn_tool = Arc::new(SpawnTool::new(subagent_manager.clone()));
        tools.register(spawn_tool.clone());

        let metrics = metrics.unwrap_or_else(|| Arc::new(MetricsCollector::new(None, true)));

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            workspace,
            model,
            max_iterations,
            memory_window,
            request_config,
            tools,
            context,
            sessions,
            message_tool,
            spawn_tool,
            subagent_manager,
            metrics,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal a cooperative stop. In-flight tool calls finish; the loop
    /// breaks before the next LLM call or the next inbound message.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Run the event loop: poll inbound messages and process them.
    ///
    /// This runs indefinitely until the inbound channel is closed.
    pub async fn run(&self) {
        info!("agent loop started, waiting for messages");
        loop {
            let next = tokio::select! {
                msg = self.bus.consume_inbound() => msg,
                _ = self.shutdown.notified() => {
                    info!("agent loop received stop signal, exiting");
                    return;
                }
            };

            match next {
                Some(msg) => {
                    let session_key = msg.session_key();
                    debug!(session_key = %session_key, "received message");

                    // Route system messages (from subagents) vs regular messages
                    let result = if msg.channel == "system" && msg.sender_id == "subagent" {
                        self.process_system_message(&msg).await
                    } else {
                        self.process_message(&msg).await
                    };

                    match result {
                        Ok(response) => {
                            if let Err(e) = self.bus.publish_outbound(response).await {
                                error!(error = %e, "failed to publish outbound message");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, session_key = %session_key, "message processing error");
                            let err_msg = OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                &format!("I encountered an error: {e}"),
                            );
                            let _ = self.bus.publish_outbound(err_msg).await;
                        }
                    }
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Process a single inbound message → outbound response.
    ///
    /// This is the core agent logic:
    /// 1. Get/create session, load history
    /// 2. Build context messages
    /// 3. LLM ↔ tool loop
    /// 4. Save session, return response
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();
        let started_at = Utc::now();

        // Set message tool context for this conversation
        self.message_tool
            .set_context(&msg.channel, &msg.chat_id)
            .await;

        // Set spawn tool context for this conversation
        self.spawn_tool
            .set_context(&msg.channel, &msg.chat_id)
            .await;

        // Get session history
        let history = self.sessions.get_history(&session_key, self.memory_window);

        // Build LLM messages
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();
        let mut messages = self.context.build_messages(
            &history,
            &msg.content,
            &media_paths,
            &msg.channel,
            &msg.chat_id,
        );

        // Get tool definitions
        let tool_defs = self.tools.get_definitions();

        // Agent loop: LLM ↔ tool calling
        let mut final_content: Option<String> = None;
        let mut last_content: Option<String> = None;
        let mut iterations_run: u32 = 0;
        let mut total_tool_calls: u32 = 0;
        let mut total_llm_calls: u32 = 0;
        let mut total_prompt_tokens: u64 = 0;
        let mut total_completion_tokens: u64 = 0;
        let mut tools_used: Vec<String> = Vec::new();
        let mut failure_reason: Option<String> = None;
        let mut stopped_early = false;

        for iteration in 0..self.max_iterations {
            if self.stop_requested() {
                warn!(session_key = %session_key, "stop requested, ending turn early");
                stopped_early = true;
                failure_reason = Some("stopped".to_string());
                break;
            }

            iterations_run = iteration as u32 + 1;
            debug!(iteration = iteration, "LLM call");

            let llm_started = std::time::Instant::now();
            let response = self
                .provider
                .chat(
                    &messages,
                    Some(&tool_defs),
                    &self.model,
                    &self.request_config,
                )
                .await;
            let llm_latency_ms = llm_started.elapsed().as_millis() as u64;

            let (prompt_tokens, completion_tokens) = response
                .usage
                .as_ref()
                .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
                .unwrap_or((0, 0));
            total_llm_calls += 1;
            total_prompt_tokens += prompt_tokens;
            total_completion_tokens += completion_tokens;

            self.metrics
                .record_llm_event(&LlmEvent {
                    ts: Utc::now().to_rfc3339(),
                    session_id: session_key.clone(),
                    model: self.model.clone(),
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                    has_tool_calls: response.has_tool_calls(),
                    num_tool_calls: response.tool_calls.len() as u32,
                    latency_ms: llm_latency_ms,
                    iteration,
                    finish_reason: response.finish_reason.clone().unwrap_or_else(|| "stop".into()),
                })
                .await;

            if response.has_tool_calls() {
                // Track the last non-empty assistant text seen, even though this
                // turn also carries tool calls — needed as the best-effort reply
                // if the loop exhausts max_iterations without a final answer.
                if let Some(text) = response.content.as_ref().filter(|t| !t.is_empty()) {
                    last_content = Some(text.clone());
                }

                // Add assistant message with tool calls
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                );

                // Execute each tool call
                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(
                        tool = %tc.function.name,
                        iteration = iteration,
                        "executing tool call"
                    );

                    let input_size = tc.function.arguments.len();
                    let tool_started = std::time::Instant::now();
                    let result = self.tools.execute(&tc.function.name, params).await;
                    let tool_latency_ms = tool_started.elapsed().as_millis() as u64;
                    let tool_success = !result.starts_with("Error");

                    debug!(
                        tool = %tc.function.name,
                        result_len = result.len(),
                        "tool result"
                    );

                    total_tool_calls += 1;
                    if !tools_used.contains(&tc.function.name) {
                        tools_used.push(tc.function.name.clone());
                    }

                    self.metrics
                        .record_tool_event(&ToolEvent {
                            ts: Utc::now().to_rfc3339(),
                            session_id: session_key.clone(),
                            tool_name: tc.function.name.clone(),
                            tool_success,
                            latency_ms: tool_latency_ms,
                            input_size,
                            output_size: result.len(),
                            error: if tool_success { None } else { Some(result.clone()) },
                            iteration,
                        })
                        .await;

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                // No tool calls → final answer
                final_content = response.content;
                break;
            }
        }

        if final_content.is_none() && !stopped_early {
            failure_reason = Some("max_iterations".to_string());
            warn!(session_key = %session_key, max_iterations = self.max_iterations, "exhausted tool-call iterations");
        }

        // On exhaustion, fall back to the last non-empty assistant text seen
        // across iterations (not a synthesized placeholder), or "" if none.
        let content = final_content.or(last_content).unwrap_or_default();

        // Save conversation to session
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        let ended_at = Utc::now();
        self.metrics
            .record_session(&SessionSummary {
                session_id: session_key.clone(),
                started_at: started_at.to_rfc3339(),
                ended_at: ended_at.to_rfc3339(),
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                success: failure_reason.is_none(),
                total_iterations: iterations_run,
                total_tool_calls,
                total_llm_calls,
                total_prompt_tokens,
                total_completion_tokens,
                total_tokens: total_prompt_tokens + total_completion_tokens,
                tools_used,
                failure_reason,
                task_type: None,
                channel: msg.channel.clone(),
                model: self.model.clone(),
            })
            .await;

        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
    }

    /// Whether a cooperative stop has been requested.
    fn stop_requested(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Process a system message (from a subagent or cron).
    ///
    /// Parses the original `channel:chat_id` from `msg.chat_id`,
    /// loads the original session, runs a full LLM call to summarize
    /// the result, and routes the response back to the correct channel.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(
            sender = %msg.sender_id,
            chat_id = %msg.chat_id,
            "processing system message"
        );
        let started_at = Utc::now();

        // Parse origin from chat_id format "channel:chat_id"
        let (origin_channel, origin_chat_id) = match msg.chat_id.split_once(':') {
            Some((ch, cid)) => (ch.to_string(), cid.to_string()),
            None => {
                return Err(anyhow::anyhow!(
                    "Invalid system message chat_id format: {}",
                    msg.chat_id
                ));
            }
        };

        let session_key = format!("{origin_channel}:{origin_chat_id}");

        // Set tools context to the original channel/chat
        self.message_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;
        self.spawn_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;

        // Load the original session
        let history = self.sessions.get_history(&session_key, self.memory_window);

        // Build messages with the subagent result as the "user" message
        let mut messages =
            self.context
                .build_messages(&history, &msg.content, &[], &origin_channel, &origin_chat_id);

        let tool_defs = self.tools.get_definitions();
        let mut final_content: Option<String> = None;
        let mut last_content: Option<String> = None;
        let mut iterations_run: u32 = 0;
        let mut total_tool_calls: u32 = 0;
        let mut total_llm_calls: u32 = 0;
        let mut total_prompt_tokens: u64 = 0;
        let mut total_completion_tokens: u64 = 0;
        let mut tools_used: Vec<String> = Vec::new();
        let mut failure_reason: Option<String> = None;
        let mut stopped_early = false;

        for iteration in 0..self.max_iterations {
            if self.stop_requested() {
                warn!(session_key = %session_key, "stop requested, ending system message early");
                stopped_early = true;
                failure_reason = Some("stopped".to_string());
                break;
            }

            iterations_run = iteration as u32 + 1;
            debug!(iteration = iteration, "system message LLM call");

            let llm_started = std::time::Instant::now();
            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;
            let llm_latency_ms = llm_started.elapsed().as_millis() as u64;

            let (prompt_tokens, completion_tokens) = response
                .usage
                .as_ref()
                .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
                .unwrap_or((0, 0));
            total_llm_calls += 1;
            total_prompt_tokens += prompt_tokens;
            total_completion_tokens += completion_tokens;

            self.metrics
                .record_llm_event(&LlmEvent {
                    ts: Utc::now().to_rfc3339(),
                    session_id: session_key.clone(),
                    model: self.model.clone(),
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                    has_tool_calls: response.has_tool_calls(),
                    num_tool_calls: response.tool_calls.len() as u32,
                    latency_ms: llm_latency_ms,
                    iteration,
                    finish_reason: response.finish_reason.clone().unwrap_or_else(|| "stop".into()),
                })
                .await;

            if response.has_tool_calls() {
                if let Some(text) = response.content.as_ref().filter(|t| !t.is_empty()) {
                    last_content = Some(text.clone());
                }

                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                );

                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    let input_size = tc.function.arguments.len();
                    let tool_started = std::time::Instant::now();
                    let result = self.tools.execute(&tc.function.name, params).await;
                    let tool_latency_ms = tool_started.elapsed().as_millis() as u64;
                    let tool_success = !result.starts_with("Error");

                    total_tool_calls += 1;
                    if !tools_used.contains(&tc.function.name) {
                        tools_used.push(tc.function.name.clone());
                    }

                    self.metrics
                        .record_tool_event(&ToolEvent {
                            ts: Utc::now().to_rfc3339(),
                            session_id: session_key.clone(),
                            tool_name: tc.function.name.clone(),
                            tool_success,
                            latency_ms: tool_latency_ms,
                            input_size,
                            output_size: result.len(),
                            error: if tool_success { None } else { Some(result.clone()) },
                            iteration,
                        })
                        .await;

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        if final_content.is_none() && !stopped_early {
            failure_reason = Some("max_iterations".to_string());
        }

        let content = final_content.or(last_content).unwrap_or_default();

        // Save to the original session
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        let ended_at = Utc::now();
        self.metrics
            .record_session(&SessionSummary {
                session_id: session_key.clone(),
                started_at: started_at.to_rfc3339(),
                ended_at: ended_at.to_rfc3339(),
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                success: failure_reason.is_none(),
                total_iterations: iterations_run,
                total_tool_calls,
                total_llm_calls,
                total_prompt_tokens,
                total_completion_tokens,
                total_tokens: total_prompt_tokens + total_completion_tokens,
                tools_used,
                failure_reason,
                task_type: Some("system".to_string()),
                channel: origin_channel.clone(),
                model: self.model.clone(),
            })
            .await;

        // Route response to the original channel/chat
        Ok(OutboundMessage::new(
            &origin_channel,
            &origin_chat_id,
            &content,
        ))
    }

    /// Direct processing mode (CLI entry point).
    ///
    /// Wraps text into an `InboundMessage` on the "cli" channel and processes.
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    /// Get a reference to the tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oxibot_core::types::{LlmResponse, ToolDefinition};

    /// A mock LLM provider that returns canned responses.
    struct MockProvider {
        /// Responses to return in sequence.
        responses: std::sync::Mutex<Vec<LlmResponse>>,
    }

    impl MockProvider {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
            }
        }

        fn simple(text: &str) -> Self {
            Self::new(vec![LlmResponse {
                content: Some(text.into()),
                ..Default::default()
            }])
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> LlmResponse {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                LlmResponse {
                    content: Some("(no more responses)".into()),
                    ..Default::default()
                }
            } else {
                responses.remove(0)
            }
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    fn create_test_loop(provider: Arc<dyn LlmProvider>) -> AgentLoop {
        let bus = Arc::new(MessageBus::new(32));
        let workspace = std::env::temp_dir().join("oxibot_test_agent");
        let _ = std::fs::create_dir_all(&workspace);

        AgentLoop::new(
            bus,
            provider,
            workspace,
            None,
            Some(5),
            None,
            None,
            None,
            None,
            false,
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_agent_simple_response() {
        let provider = Arc::new(MockProvider::simple("Hello from Oxibot!"));
        let agent = create_test_loop(provider);

        let result = agent.process_direct("Hi").await.unwrap();
        assert_eq!(result, "Hello from Oxibot!");
    }

    #[tokio::test]
    async fn test_agent_tool_calling() {
        // First response: LLM requests read_file tool call
        // Second response: LLM gives final answer
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test.txt");
        std::fs::write(&test_file, "file content here").unwrap();

        let tool_call = ToolCall::new(
            "call_1",
            "read_file",
            serde_json::json!({"path": test_file.to_str().unwrap()}).to_string(),
        );

        let responses = vec![
            LlmResponse {
                content: None,
                tool_calls: vec![tool_call],
                ..Default::default()
            },
            LlmResponse {
                content: Some("The file contains: file content here".into()),
                ..Default::default()
            },
        ];

        let provider = Arc::new(MockProvider::new(responses));
        let bus = Arc::new(MessageBus::new(32));

        let agent = AgentLoop::new(
            bus,
            provider,
            dir.path().to_path_buf(),
            None,
            Some(10),
            None,
            None,
            None,
            None,
            false,
            None,
            None,
            None,
        );

        let result = agent.process_direct("Read test.txt").await.unwrap();
        assert_eq!(result, "The file contains: file content here");
    }

    #[tokio::test]
    async fn test_agent_max_iterations() {
        // All responses are tool calls → should exhaust max_iterations
        let tool_call = ToolCall::new("call_loop", "list_dir", r#"{"path": "/tmp"}"#);
        let responses: Vec<LlmResponse> = (0..10)
            .map(|_| LlmResponse {
                content: None,
                tool_calls: vec![tool_call.clone()],
                ..Default::default()
            })
            .collect();

        let provider = Arc::new(MockProvider::new(responses));
        let agent = create_test_loop(provider);

        // No response in the mock ever carries non-empty content alongside
        // its tool calls, so the best-effort reply on exhaustion is "".
        let result = agent.process_direct("loop forever").await.unwrap();
        assert_eq!(result, "");
    }

    #[tokio::test]
    async fn test_agent_max_iterations_returns_last_non_empty_content() {
        // Every response both answers AND requests another tool call; on
        // exhaustion the loop should surface the last of those answers
        // rather than an empty string or a synthesized placeholder.
        let tool_call = ToolCall::new("call_loop", "list_dir", r#"{"path": "/tmp"}"#);
        let responses: Vec<LlmResponse> = (0..10)
            .map(|i| LlmResponse {
                content: Some(format!("thinking, step {i}")),
                tool_calls: vec![tool_call.clone()],
                ..Default::default()
            })
            .collect();

        let provider = Arc::new(MockProvider::new(responses));
        let agent = create_test_loop(provider);

        let result = agent.process_direct("loop forever").await.unwrap();
        assert_eq!(result, "thinking, step 4");
    }

    #[test]
    fn test_default_tools_registered() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let agent = create_test_loop(provider);

        let names = agent.tools().tool_names();
        assert!(names.contains(&"read_file".into()));
        assert!(names.contains(&"write_file".into()));
        assert!(names.contains(&"edit_file".into()));
        assert!(names.contains(&"list_dir".into()));
        assert!(names.contains(&"exec".into()));
        assert!(names.contains(&"web_search".into()));
        assert!(names.contains(&"web_fetch".into()));
        assert!(names.contains(&"message".into()));
        assert!(names.contains(&"spawn".into()));
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn test_model_defaults_to_provider() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let agent = create_test_loop(provider);
        assert_eq!(agent.model(), "mock-model");
    }

    #[test]
    fn test_exec_tool_config_default() {
        let config = ExecToolConfig::default();
        assert_eq!(config.timeout, 60);
    }

    #[tokio::test]
    async fn test_process_system_message() {
        let provider = Arc::new(MockProvider::simple("Here's a summary of the result."));
        let bus = Arc::new(MessageBus::new(32));
        let workspace = std::env::temp_dir().join("oxibot_test_system_msg");
        let _ = std::fs::create_dir_all(&workspace);

        let agent = AgentLoop::new(
            bus,
            provider,
            workspace,
            None,
            Some(5),
            None,
            None,
            None,
            None,
            false,
            None,
            None,
            None,
        );

        // Simulate a subagent result message
        let msg = InboundMessage::new(
            "system",
            "subagent",
            "telegram:chat_42",
            "## Subagent Result\n**Task**: test\n\nDone!",
        );

        let response = agent.process_system_message(&msg).await.unwrap();

        // Response should be routed to the original channel/chat
        assert_eq!(response.channel, "telegram");
        assert_eq!(response.chat_id, "chat_42");
        assert_eq!(response.content, "Here's a summary of the result.");
    }

    #[tokio::test]
    async fn test_process_system_message_invalid_format() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let agent = create_test_loop(provider);

        // Missing colon separator
        let msg = InboundMessage::new("system", "subagent", "invalid_chat_id", "test");

        let result = agent.process_system_message(&msg).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_routes_system_messages() {
        // Verify that the run loop correctly routes system messages
        let provider = Arc::new(MockProvider::simple("Summary of result"));
        let bus = Arc::new(MessageBus::new(32));
        let workspace = std::env::temp_dir().join("oxibot_test_run_route");
        let _ = std::fs::create_dir_all(&workspace);

        let agent = AgentLoop::new(
            bus.clone(),
            provider,
            workspace,
            None,
            Some(5),
            None,
            None,
            None,
            None,
            false,
            None,
            None,
            None,
        );

        // Publish a system message
        let msg = InboundMessage::new(
            "system",
            "subagent",
            "discord:guild_1",
            "Subagent result content",
        );
        bus.publish_inbound(msg).await.unwrap();

        // Drop the inbound sender by dropping our handle — but we need
        // a different approach since MessageBus owns the sender.
        // Instead, just test process_message routing directly.

        // We already test process_system_message above, so just verify
        // the agent has the spawn tool
        assert!(agent.tools().has("spawn"));
    }

    #[tokio::test]
    async fn test_subagent_manager_accessible() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let agent = create_test_loop(provider);

        // Subagent manager should start with 0 tasks
        assert_eq!(agent.subagent_manager.task_count().await, 0);
    }
}
