//! OpenAI ⇄ Gemini (v1internal) wire format translation.
//!
//! Ported from nanobot's `providers/antigravity/transform.py`. Gemini's
//! `contents` array alternates `user`/`model` turns and has no first-class
//! system role, no `tool` role, and a JSON-Schema dialect that rejects several
//! keys OpenAI-style tool schemas commonly use.

use std::collections::HashMap;

use serde_json::{json, Value};

use oxibot_core::types::{
    LlmResponse, LlmStreamChunk, Message, MessageContent, ToolCall, ToolCallDelta, ToolDefinition,
    UsageInfo,
};

use super::constants::REJECTED_SCHEMA_KEYS;

fn short_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

// ─────────────────────────────────────────────
// Request side: Message -> Gemini contents
// ─────────────────────────────────────────────

/// Convert our OpenAI-shaped messages into `(contents, system_instruction)`.
///
/// `system_instruction` is `None` when there were no system messages.
pub fn messages_to_gemini(messages: &[Message]) -> (Vec<Value>, Option<Value>) {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut raw_entries: Vec<(&'static str, Vec<Value>)> = Vec::new();
    let mut call_id_to_name: HashMap<String, String> = HashMap::new();

    for message in messages {
        match message {
            Message::System { content } => {
                if !content.is_empty() {
                    system_parts.push(json!({"text": content}));
                }
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut parts = Vec::new();
                if let Some(text) = content {
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                }
                if let Some(calls) = tool_calls {
                    for call in calls {
                        call_id_to_name.insert(call.id.clone(), call.function.name.clone());
                        let args: Value = serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| json!({"raw": call.function.arguments}));
                        let id = if call.id.is_empty() {
                            short_id("tc")
                        } else {
                            call.id.clone()
                        };
                        parts.push(json!({
                            "functionCall": {"id": id, "name": call.function.name, "args": args}
                        }));
                    }
                }
                if !parts.is_empty() {
                    raw_entries.push(("model", parts));
                }
            }
            Message::Tool {
                content,
                tool_call_id,
            } => {
                let name = call_id_to_name
                    .get(tool_call_id)
                    .cloned()
                    .unwrap_or_default();
                let part = json!({
                    "functionResponse": {
                        "id": tool_call_id,
                        "name": name,
                        "response": {"result": content},
                    }
                });
                raw_entries.push(("user", vec![part]));
            }
            Message::User { content } => {
                let parts = content_to_text_parts(content);
                if !parts.is_empty() {
                    raw_entries.push(("user", parts));
                }
            }
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(json!({"role": "user", "parts": system_parts}))
    };

    (merge_turns(raw_entries), system_instruction)
}

/// Only plain text is forwarded — image parts aren't translated to Gemini
/// `inlineData` here, matching the reference transform's scope.
fn content_to_text_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![json!({"text": text})]
            }
        }
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                oxibot_core::types::ContentPart::Text { text } => Some(json!({"text": text})),
                oxibot_core::types::ContentPart::ImageUrl { .. } => None,
            })
            .collect(),
    }
}

fn has_function_response(parts: &[Value]) -> bool {
    parts.iter().any(|p| p.get("functionResponse").is_some())
}

/// Merge adjacent same-role turns. Gemini rejects a turn that mixes
/// `functionResponse` parts with plain `text`/`functionCall` parts, so when
/// merging would do that, a synthetic `{"role":"model","parts":[{"text":"OK."}]}`
/// separator is inserted first to break the turn apart instead.
fn merge_turns(entries: Vec<(&'static str, Vec<Value>)>) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();

    for (role, parts) in entries {
        if parts.is_empty() {
            continue;
        }
        let merge_target = contents.last().and_then(|last| {
            let same_role = last["role"].as_str() == Some(role);
            same_role.then(|| last["parts"].as_array().cloned().unwrap_or_default())
        });

        match merge_target {
            Some(last_parts) if has_function_response(&last_parts) == has_function_response(&parts) => {
                let last = contents.last_mut().unwrap();
                last["parts"].as_array_mut().unwrap().extend(parts);
            }
            Some(_) => {
                contents.push(json!({"role": "model", "parts": [{"text": "OK."}]}));
                contents.push(json!({"role": role, "parts": parts}));
            }
            None => {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }
    }

    contents
}

/// Wrap OpenAI-style tool definitions into a single Gemini `functionDeclarations` block.
pub fn tools_to_gemini(tools: &[ToolDefinition]) -> Vec<Value> {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.function.name,
                "description": t.function.description,
                "parameters": sanitize_schema(&t.function.parameters),
            })
        })
        .collect();
    vec![json!({"functionDeclarations": declarations})]
}

/// Strip JSON-Schema keys Gemini's function-calling schema rejects, and
/// collapse `allOf`/`anyOf`/`oneOf` composition it doesn't understand.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut map = map.clone();
            resolve_all_of(&mut map);
            resolve_any_of_one_of(&mut map, "anyOf");
            resolve_any_of_one_of(&mut map, "oneOf");

            let mut out = serde_json::Map::new();
            for (key, value) in map {
                if key == "const" {
                    out.insert("enum".to_string(), Value::Array(vec![value]));
                    continue;
                }
                if REJECTED_SCHEMA_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key, sanitize_schema(&value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn resolve_all_of(map: &mut serde_json::Map<String, Value>) {
    let Some(Value::Array(branches)) = map.remove("allOf") else {
        return;
    };

    let mut properties = serde_json::Map::new();
    let mut required: Vec<Value> = Vec::new();
    let mut other_keys = serde_json::Map::new();

    for branch in branches {
        let Value::Object(branch_map) = branch else { continue };
        for (key, value) in branch_map {
            match key.as_str() {
                "properties" => {
                    if let Value::Object(props) = value {
                        for (k, v) in props {
                            properties.insert(k, v);
                        }
                    }
                }
                "required" => {
                    if let Value::Array(items) = value {
                        for item in items {
                            if !required.contains(&item) {
                                required.push(item);
                            }
                        }
                    }
                }
                _ => {
                    other_keys.entry(key).or_insert(value);
                }
            }
        }
    }

    for (key, value) in other_keys {
        map.entry(key).or_insert(value);
    }
    if !properties.is_empty() {
        map.insert("properties".to_string(), Value::Object(properties));
    }
    if !required.is_empty() {
        map.insert("required".to_string(), Value::Array(required));
    }
    map.entry("type".to_string())
        .or_insert_with(|| Value::String("object".to_string()));
}

/// `anyOf`/`oneOf` are collapsed to a single branch: null-type branches are
/// dropped (optionality is expressed elsewhere), then the first remaining
/// branch wins — Gemini has no native union type.
fn resolve_any_of_one_of(map: &mut serde_json::Map<String, Value>, key: &str) {
    let Some(Value::Array(branches)) = map.remove(key) else {
        return;
    };

    let non_null: Vec<Value> = branches
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) != Some("null"))
        .cloned()
        .collect();

    let chosen = non_null
        .into_iter()
        .next()
        .or_else(|| branches.into_iter().next());

    if let Some(Value::Object(chosen_map)) = chosen {
        for (k, v) in chosen_map {
            map.entry(k).or_insert(v);
        }
    }
}

// ─────────────────────────────────────────────
// Response side: Gemini -> LlmResponse / LlmStreamChunk
// ─────────────────────────────────────────────

fn unwrap_response(data: &Value) -> Value {
    data.get("response").cloned().unwrap_or_else(|| data.clone())
}

fn map_finish_reason(raw: &str) -> &'static str {
    match raw {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        "FINISH_REASON_UNSPECIFIED" => "stop",
        _ => "stop",
    }
}

fn parse_usage(envelope: &Value) -> Option<UsageInfo> {
    let usage = envelope.get("usageMetadata")?;
    Some(UsageInfo {
        prompt_tokens: usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion_tokens: usage
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        total_tokens: usage.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32,
    })
}

/// Parse a complete (non-streaming) `generateContent` response.
pub fn parse_gemini_response(response_json: &Value, _model: &str) -> LlmResponse {
    let envelope = unwrap_response(response_json);
    let Some(candidate) = envelope.get("candidates").and_then(|c| c.get(0)) else {
        return LlmResponse::error("Antigravity response had no candidates");
    };

    let mut content_parts: Vec<String> = Vec::new();
    let mut reasoning_content: Option<String> = None;
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    reasoning_content = Some(text.to_string());
                } else {
                    content_parts.push(text.to_string());
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall::new(
                    short_id("ag"),
                    name,
                    serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
                ));
            }
        }
    }

    let raw_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("STOP");

    LlmResponse {
        content: (!content_parts.is_empty()).then(|| content_parts.join("\n")),
        tool_calls,
        finish_reason: Some(map_finish_reason(raw_reason).to_string()),
        usage: parse_usage(&envelope),
        reasoning_content,
    }
}

/// Parse one `data:` payload of an SSE `streamGenerateContent` response.
pub fn parse_sse_chunk(event_data: &Value) -> LlmStreamChunk {
    let envelope = unwrap_response(event_data);
    let Some(candidate) = envelope.get("candidates").and_then(|c| c.get(0)) else {
        return LlmStreamChunk::default();
    };

    let mut content_delta: Option<String> = None;
    let mut reasoning_delta: Option<String> = None;
    let mut tool_calls_delta: Vec<ToolCallDelta> = Vec::new();

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    reasoning_delta = Some(match reasoning_delta.take() {
                        Some(existing) => existing + text,
                        None => text.to_string(),
                    });
                } else {
                    content_delta = Some(match content_delta.take() {
                        Some(existing) => existing + text,
                        None => text.to_string(),
                    });
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).map(str::to_string);
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls_delta.push(ToolCallDelta {
                    id: short_id("ag"),
                    name,
                    arguments_json: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
                });
            }
        }
    }

    LlmStreamChunk {
        content_delta,
        tool_calls_delta,
        reasoning_delta,
        finish_reason: candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(|r| map_finish_reason(r).to_string()),
        usage: parse_usage(&envelope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_system_instruction() {
        let messages = vec![Message::system("Be terse."), Message::user("Hi")];
        let (contents, system) = messages_to_gemini(&messages);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        let system = system.unwrap();
        assert_eq!(system["parts"][0]["text"], "Be terse.");
    }

    #[test]
    fn adjacent_same_role_messages_merge() {
        let messages = vec![Message::user("one"), Message::user("two")];
        let (contents, _) = messages_to_gemini(&messages);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tool_response_inserts_ok_separator_before_mismatched_merge() {
        let messages = vec![
            Message::assistant_tool_calls(vec![ToolCall::new("call_1", "get_time", "{}")]),
            Message::tool_result("call_1", "12:00"),
            Message::assistant("The time is 12:00."),
        ];
        let (contents, _) = messages_to_gemini(&messages);

        // model(functionCall), user(functionResponse), model(OK. separator)? — check shape:
        // entry0: model/functionCall, entry1: user/functionResponse (diff role, no merge)
        // entry2: model/text — last content role is "user", differs, pushed fresh: model/text.
        assert_eq!(contents[0]["role"], "model");
        assert!(contents[0]["parts"][0].get("functionCall").is_some());
        assert_eq!(contents[1]["role"], "user");
        assert!(contents[1]["parts"][0].get("functionResponse").is_some());
        assert_eq!(contents[2]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "The time is 12:00.");
    }

    #[test]
    fn separator_inserted_when_merging_functionresponse_with_text_same_role() {
        let messages = vec![
            Message::assistant_tool_calls(vec![ToolCall::new("call_1", "a", "{}")]),
            Message::assistant_tool_calls(vec![ToolCall::new("call_2", "b", "{}")]),
            Message::tool_result("call_1", "r1"),
            Message::tool_result("call_2", "r2"),
        ];
        let (contents, _) = messages_to_gemini(&messages);
        // Two model entries merge (both functionCall, no mismatch).
        // Two user/functionResponse entries merge (both functionResponse, no mismatch).
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(contents[1]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn const_becomes_enum() {
        let schema = json!({"type": "string", "const": "fixed"});
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["enum"], json!(["fixed"]));
        assert!(sanitized.get("const").is_none());
    }

    #[test]
    fn rejected_keys_are_stripped_recursively() {
        let schema = json!({
            "type": "object",
            "title": "Drop me",
            "properties": {
                "x": {"type": "string", "default": "y", "$ref": "#/defs/X"}
            }
        });
        let sanitized = sanitize_schema(&schema);
        assert!(sanitized.get("title").is_none());
        assert!(sanitized["properties"]["x"].get("default").is_none());
        assert!(sanitized["properties"]["x"].get("$ref").is_none());
    }

    #[test]
    fn all_of_merges_properties_and_required() {
        let schema = json!({
            "allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
                {"properties": {"b": {"type": "number"}}, "required": ["b"]}
            ]
        });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["type"], "object");
        assert!(sanitized["properties"]["a"].is_object());
        assert!(sanitized["properties"]["b"].is_object());
        let required = sanitized["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn any_of_drops_null_branch_and_picks_first_remaining() {
        let schema = json!({
            "anyOf": [{"type": "null"}, {"type": "string"}, {"type": "integer"}]
        });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["type"], "string");
    }

    #[test]
    fn parse_response_extracts_text_and_tool_calls() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Hello there"},
                    {"functionCall": {"name": "get_time", "args": {"tz": "UTC"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12}
        });

        let parsed = parse_gemini_response(&response, "gemini-3-pro");
        assert_eq!(parsed.content.as_deref(), Some("Hello there"));
        assert_eq!(parsed.reasoning_content.as_deref(), Some("thinking..."));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].function.name, "get_time");
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn parse_response_unwraps_response_envelope() {
        let response = json!({"response": {"candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "STOP"}]}});
        let parsed = parse_gemini_response(&response, "gemini-3-pro");
        assert_eq!(parsed.content.as_deref(), Some("hi"));
    }

    #[test]
    fn parse_sse_chunk_accumulates_content() {
        let chunk = json!({
            "candidates": [{"content": {"parts": [{"text": "par"}, {"text": "tial"}]}}]
        });
        let parsed = parse_sse_chunk(&chunk);
        assert_eq!(parsed.content_delta.as_deref(), Some("partial"));
        assert!(parsed.finish_reason.is_none());
    }

    #[test]
    fn tools_to_gemini_wraps_in_function_declarations() {
        let tools = vec![ToolDefinition::new(
            "search",
            "Search the web",
            json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        )];
        let gemini_tools = tools_to_gemini(&tools);
        assert_eq!(gemini_tools.len(), 1);
        let decls = gemini_tools[0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(decls[0]["name"], "search");
    }
}
