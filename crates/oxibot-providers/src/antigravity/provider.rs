//! Gemini "v1internal" (Antigravity/Code Assist) LLM provider.
//!
//! Ported from nanobot's `providers/antigravity/provider.py`. Talks to the
//! same backend the Antigravity desktop client uses, with per-account OAuth,
//! automatic project discovery, and endpoint failover across prod/daily/autopush.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use oxibot_core::types::{LlmResponse, LlmStreamChunk, Message, ToolDefinition};

use super::constants::{
    content_request_headers, discovery_headers, platform_tag_for_metadata, API_ENDPOINT_FALLBACKS,
    DEFAULT_API_ENDPOINT, DEFAULT_MODEL, DEFAULT_PROJECT_ID, FALLBACK_STATUS_CODES,
    GENERATE_CONTENT_PATH, LITELLM_PREFIXES, LOAD_CODE_ASSIST_PATH, MAX_RETRIES, MODEL_ALIASES,
    RETRYABLE_STATUS_CODES, RETRY_BASE_DELAY_SECS, STREAM_GENERATE_CONTENT_PATH,
};
use super::credentials::CredentialStore;
use super::schema::{messages_to_gemini, parse_gemini_response, parse_sse_chunk, tools_to_gemini};
use crate::traits::{LlmProvider, LlmRequestConfig};

/// LLM provider backed by Antigravity's OAuth-authenticated Gemini gateway.
pub struct AntigravityProvider {
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    endpoint: String,
    default_model: String,
    project_id_override: Option<String>,
    project_id_cache: tokio::sync::Mutex<HashMap<String, String>>,
    session_id: std::sync::OnceLock<String>,
}

impl AntigravityProvider {
    pub fn new(
        credentials: Arc<CredentialStore>,
        endpoint: Option<String>,
        default_model: Option<String>,
        project_id: Option<String>,
    ) -> Self {
        AntigravityProvider {
            credentials,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            project_id_override: project_id,
            project_id_cache: tokio::sync::Mutex::new(HashMap::new()),
            session_id: std::sync::OnceLock::new(),
        }
    }

    fn session_id(&self) -> &str {
        self.session_id
            .get_or_init(|| format!("-{}", uuid::Uuid::new_v4()))
    }

    /// Endpoints to try, in order. A custom (non-standard) endpoint gets no
    /// fallback — if the user pointed this provider somewhere specific, we
    /// respect that rather than silently trying Google's other environments.
    fn content_endpoints(&self) -> Vec<String> {
        if API_ENDPOINT_FALLBACKS.contains(&self.endpoint.as_str()) {
            let mut endpoints = vec![self.endpoint.clone()];
            endpoints.extend(
                API_ENDPOINT_FALLBACKS
                    .iter()
                    .filter(|e| **e != self.endpoint)
                    .map(|e| e.to_string()),
            );
            endpoints
        } else {
            vec![self.endpoint.clone()]
        }
    }

    /// Discovery tries prod first, then daily, then autopush — the reverse of
    /// `API_ENDPOINT_FALLBACKS`' daily-first content order.
    fn discovery_endpoints() -> Vec<&'static str> {
        let mut v: Vec<&'static str> = vec![API_ENDPOINT_FALLBACKS[API_ENDPOINT_FALLBACKS.len() - 1]];
        v.extend(API_ENDPOINT_FALLBACKS[..API_ENDPOINT_FALLBACKS.len() - 1].iter());
        v
    }

    async fn ensure_project_id(&self, token: &str, email: &str) -> String {
        if let Some(p) = &self.project_id_override {
            return p.clone();
        }

        {
            let cache = self.project_id_cache.lock().await;
            if let Some(p) = cache.get(email) {
                return p.clone();
            }
        }

        for endpoint in Self::discovery_endpoints() {
            let url = format!("{endpoint}{LOAD_CODE_ASSIST_PATH}");
            let mut req = self.client.post(&url).bearer_auth(token).json(&json!({
                "metadata": {
                    "ideType": "ANTIGRAVITY",
                    "platform": platform_tag_for_metadata(),
                    "pluginType": "GEMINI",
                }
            }));
            for (k, v) in discovery_headers() {
                req = req.header(k, v);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(body) = resp.json::<Value>().await {
                        if let Some(project) = body.get("cloudaicompanionProject").and_then(Value::as_str) {
                            let mut cache = self.project_id_cache.lock().await;
                            cache.insert(email.to_string(), project.to_string());
                            return project.to_string();
                        }
                    }
                }
                Ok(resp) => {
                    debug!(endpoint, status = %resp.status(), "loadCodeAssist discovery failed");
                }
                Err(e) => {
                    debug!(endpoint, error = %e, "loadCodeAssist request error");
                }
            }
        }

        warn!("Antigravity project discovery failed on all endpoints, using default project id");
        DEFAULT_PROJECT_ID.to_string()
    }

    fn retry_delay(retry_after: Option<&str>, attempt: u32) -> Duration {
        if let Some(value) = retry_after.and_then(|v| v.parse::<f64>().ok()) {
            return Duration::from_secs_f64(value.min(60.0).max(0.0));
        }
        Duration::from_secs_f64(RETRY_BASE_DELAY_SECS * 2f64.powi(attempt as i32))
    }

    async fn request_with_retry(&self, body: &Value, token: &str) -> Result<Value, String> {
        let endpoints = self.content_endpoints();
        let mut last_error: Option<String> = None;

        for endpoint in &endpoints {
            let url = format!("{endpoint}{GENERATE_CONTENT_PATH}");

            for attempt in 0..MAX_RETRIES {
                let mut req = self.client.post(&url).bearer_auth(token).json(body);
                for (k, v) in content_request_headers() {
                    req = req.header(k, v);
                }

                let resp = match req.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        last_error = Some(e.to_string());
                        break; // advance to next endpoint
                    }
                };

                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    return resp.json::<Value>().await.map_err(|e| e.to_string());
                }

                if FALLBACK_STATUS_CODES.contains(&status) {
                    last_error = Some(format!("{status}: endpoint rejected request"));
                    break;
                }

                if RETRYABLE_STATUS_CODES.contains(&status) {
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body_text = resp.text().await.unwrap_or_default();
                    last_error = Some(format!("{status}: {body_text}"));
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(Self::retry_delay(retry_after.as_deref(), attempt)).await;
                        continue;
                    }
                    break;
                }

                let body_text = resp.text().await.unwrap_or_default();
                return Err(format!("{status}: {body_text}"));
            }
        }

        Err(last_error.unwrap_or_else(|| "Antigravity request failed on all endpoints".to_string()))
    }

    /// Strip LiteLLM-style prefixes, the `antigravity-` prefix, and a
    /// `-preview` suffix, apply known aliases, and auto-pick a reasoning tier
    /// for bare `gemini-3-pro`.
    fn resolve_model(model: &str) -> String {
        let lower = model.to_lowercase();
        let mut resolved = model.to_string();

        for prefix in LITELLM_PREFIXES {
            if lower.starts_with(prefix) {
                resolved = model[prefix.len()..].to_string();
                break;
            }
        }

        if let Some(stripped) = resolved.strip_prefix("antigravity-") {
            resolved = stripped.to_string();
        }
        if let Some(stripped) = resolved.strip_suffix("-preview") {
            resolved = stripped.to_string();
        }

        if let Some((_, alias)) = MODEL_ALIASES.iter().find(|(k, _)| *k == resolved) {
            resolved = alias.to_string();
        }

        let resolved_lower = resolved.to_lowercase();
        if resolved_lower.starts_with("gemini-3-pro")
            && !["-minimal", "-low", "-medium", "-high"]
                .iter()
                .any(|tier| resolved_lower.ends_with(tier))
        {
            resolved.push_str("-low");
        }

        resolved
    }

    fn is_thinking_model(model: &str) -> bool {
        model.ends_with("-thinking")
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        max_tokens: u32,
        temperature: f64,
        project_id: &str,
    ) -> (String, Value) {
        let api_model = Self::resolve_model(model);
        let (contents, system_instruction) = messages_to_gemini(messages);

        let mut max_output_tokens = max_tokens;
        let mut generation_config = json!({
            "maxOutputTokens": max_output_tokens,
            "temperature": temperature,
        });

        if Self::is_thinking_model(&api_model) {
            let thinking_budget = (max_tokens / 2).max(8192);
            if max_output_tokens < thinking_budget + 4096 {
                max_output_tokens = thinking_budget + 4096;
            }
            generation_config["maxOutputTokens"] = json!(max_output_tokens);
            generation_config["thinkingConfig"] = json!({
                "includeThoughts": true,
                "thinkingBudget": thinking_budget,
            });
        }

        let mut request_payload = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if let Some(system) = system_instruction {
            request_payload["systemInstruction"] = system;
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                request_payload["tools"] = json!(tools_to_gemini(tools));
            }
        }
        request_payload["sessionId"] = json!(self.session_id());

        let envelope = json!({
            "project": project_id,
            "model": api_model,
            "request": request_payload,
            "requestType": "agent",
            "userAgent": "antigravity",
            "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
        });

        (api_model, envelope)
    }

    async fn try_stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<BoxStream<'static, LlmStreamChunk>, String> {
        let token = self
            .credentials
            .get_valid_token()
            .await
            .map_err(|e| e.to_string())?;
        let email = self.credentials.active_email().unwrap_or_default();
        let project_id = self.ensure_project_id(&token, &email).await;
        let (_, body) =
            self.build_request_body(messages, tools, model, config.max_tokens, config.temperature, &project_id);

        let endpoint = self
            .content_endpoints()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.endpoint.clone());
        let url = format!("{endpoint}{STREAM_GENERATE_CONTENT_PATH}?alt=sse");

        let mut req = self.client.post(&url).bearer_auth(&token).json(&body);
        for (k, v) in content_request_headers() {
            req = req.header(k, v);
        }
        req = req.header("Accept", "text/event-stream");

        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("{status}: {text}"));
        }

        let lines = sse_lines(resp.bytes_stream());
        let chunks = lines.filter_map(|line| async move {
            let line = line.trim().to_string();
            let data = line.strip_prefix("data: ")?;
            if data == "[DONE]" {
                return None;
            }
            let value: Value = serde_json::from_str(data).ok()?;
            Some(parse_sse_chunk(&value))
        });

        Ok(chunks.boxed())
    }
}

/// Re-assemble a byte stream into newline-delimited text lines, buffering
/// partial lines across chunk boundaries.
fn sse_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = String> + Send + 'static {
    stream::unfold(
        (Box::pin(byte_stream), String::new(), VecDeque::<String>::new()),
        |(mut stream, mut buf, mut queue)| async move {
            loop {
                if let Some(line) = queue.pop_front() {
                    return Some((line, (stream, buf, queue)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buf.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buf.find('\n') {
                            let line: String = buf.drain(..=pos).collect();
                            queue.push_back(line.trim_end_matches(['\r', '\n']).to_string());
                        }
                    }
                    Some(Err(_)) | None => {
                        if !buf.is_empty() {
                            let line = std::mem::take(&mut buf);
                            return Some((line, (stream, buf, queue)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[async_trait]
impl LlmProvider for AntigravityProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        let token = match self.credentials.get_valid_token().await {
            Ok(t) => t,
            Err(e) => return LlmResponse::error(format!("Antigravity error: {e}")),
        };
        let email = self.credentials.active_email().unwrap_or_default();
        let project_id = self.ensure_project_id(&token, &email).await;
        let (api_model, body) =
            self.build_request_body(messages, tools, model, config.max_tokens, config.temperature, &project_id);

        match self.request_with_retry(&body, &token).await {
            Ok(response) => parse_gemini_response(&response, &api_model),
            Err(e) => LlmResponse::error(format!("Antigravity error: {e}")),
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        "Antigravity"
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> BoxStream<'static, LlmStreamChunk> {
        match self.try_stream_chat(messages, tools, model, config).await {
            Ok(stream) => stream,
            Err(e) => {
                stream::once(async move { LlmStreamChunk::error(format!("Antigravity error: {e}")) }).boxed()
            }
        }
    }
}
