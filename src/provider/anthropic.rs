//! Anthropic-messages shape adapter (§4.2), including ephemeral cache-hint
//! marking (§4.2 "Cache-hint marking (Anthropic only)").

use serde_json::{json, Value};

use crate::cost::TokenUsage;
use crate::error::AdapterError;
use crate::message::{Message, MsgType, Role, UnifiedTool};

use super::{ParsedResponse, ProviderAdapter, ProviderShape};

#[derive(Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        AnthropicAdapter
    }
}

fn ephemeral_cache_control() -> Value {
    json!({ "type": "ephemeral" })
}

impl ProviderAdapter for AnthropicAdapter {
    fn shape(&self) -> ProviderShape {
        ProviderShape::Anthropic
    }

    fn build_request(
        &self,
        model: &str,
        history: &[Message],
        tools: &[UnifiedTool],
        system_prompt: Option<&str>,
        cache_enabled: bool,
    ) -> Value {
        // All system-typed entries collect into the top-level `system` array
        // (§4.2), in addition to an explicit system_prompt if given.
        let mut system_blocks: Vec<Value> = Vec::new();
        if let Some(sys) = system_prompt {
            system_blocks.push(json!({ "type": "text", "text": sys }));
        }
        for m in history.iter().filter(|m| m.msg_type == MsgType::Msg && m.role == Role::System) {
            system_blocks.push(json!({ "type": "text", "text": m.content }));
        }
        if cache_enabled {
            if let Some(last) = system_blocks.last_mut() {
                last["cache_control"] = ephemeral_cache_control();
            }
        }

        let mut messages: Vec<Value> = Vec::new();
        for m in history {
            match m.msg_type {
                MsgType::Msg if m.role == Role::User => {
                    messages.push(json!({ "role": "user", "content": [{ "type": "text", "text": m.content }] }))
                }
                MsgType::Msg if m.role == Role::Assistant => {
                    messages.push(json!({ "role": "assistant", "content": [{ "type": "text", "text": m.content }] }))
                }
                MsgType::Msg => {} // system already collected above
                MsgType::ToolCall => {
                    let input: Value = serde_json::from_str(&m.content).unwrap_or(json!({}));
                    messages.push(json!({
                        "role": "assistant",
                        "content": [{
                            "type": "tool_use",
                            "id": m.tool_use_id.clone().unwrap_or_default(),
                            "name": m.tool_name.clone().unwrap_or_default(),
                            "input": input,
                        }],
                    }))
                }
                MsgType::ToolResult => messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_use_id.clone().unwrap_or_default(),
                        "content": m.content,
                    }],
                })),
                _ => {}
            }
        }
        if cache_enabled {
            if let Some(last) = messages.last_mut() {
                if let Some(block) = last["content"].get_mut(0) {
                    block["cache_control"] = ephemeral_cache_control();
                }
            }
        }

        let mut tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
            .collect();
        if cache_enabled {
            if let Some(last) = tool_defs.last_mut() {
                last["cache_control"] = ephemeral_cache_control();
            }
        }

        let mut body = json!({ "model": model, "messages": messages });
        if !system_blocks.is_empty() {
            body["system"] = json!(system_blocks);
        }
        if !tool_defs.is_empty() {
            body["tools"] = json!(tool_defs);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedResponse, AdapterError> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| AdapterError::MalformedResponse { provider: "anthropic".into(), reason: "missing content[]".into() })?;
        let stop_reason = body.get("stop_reason").and_then(|v| v.as_str()).unwrap_or("");

        let mut messages = Vec::new();
        let mut has_tool_use = false;
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()) {
                Some("text") => {
                    let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                    messages.push(Message::msg(Role::Assistant, text));
                }
                Some("tool_use") => {
                    has_tool_use = true;
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let input = block.get("input").cloned().unwrap_or(json!({}));
                    messages.push(Message::tool_call(id, name, input.to_string()));
                }
                Some(other) => {
                    return Err(AdapterError::UnrecognizedBlock { provider: "anthropic".into(), kind: other.to_string() })
                }
                None => return Err(AdapterError::UnrecognizedBlock { provider: "anthropic".into(), kind: "<missing type>".into() }),
            }
        }

        let usage = extract_usage(body.get("usage"));
        let stopped = stop_reason == "end_turn" && !has_tool_use;

        Ok(ParsedResponse { messages, usage, stopped })
    }
}

fn extract_usage(usage: Option<&Value>) -> TokenUsage {
    let Some(usage) = usage else { return TokenUsage::default() };
    let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cache_creation = usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cache_read = usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);

    let mut u = TokenUsage::new(input_tokens + cache_creation + cache_read, output);
    u.input_breakdown.cache_write = cache_creation;
    u.input_breakdown.cache_read = cache_read;
    u.input_breakdown.non_cache_read = input_tokens;
    u
}
