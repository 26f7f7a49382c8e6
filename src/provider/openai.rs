//! OpenAI-chat shape adapter (§4.2).

use serde_json::{json, Value};

use crate::cost::TokenUsage;
use crate::error::AdapterError;
use crate::message::{Message, MsgType, Role, UnifiedTool};

use super::{ParsedResponse, ProviderAdapter, ProviderShape};

#[derive(Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        OpenAiAdapter
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn shape(&self) -> ProviderShape {
        ProviderShape::OpenAI
    }

    fn build_request(
        &self,
        model: &str,
        history: &[Message],
        tools: &[UnifiedTool],
        system_prompt: Option<&str>,
        _cache_enabled: bool,
    ) -> Value {
        let mut messages = Vec::new();

        // At most one leading system message: the explicit system prompt if
        // set, else the last historical system entry (§4.2 "System-prompt
        // handling differs").
        let system_text = system_prompt.map(|s| s.to_string()).or_else(|| {
            history
                .iter()
                .rev()
                .find(|m| m.msg_type == MsgType::Msg && m.role == Role::System)
                .map(|m| m.content.clone())
        });
        if let Some(sys) = system_text {
            messages.push(json!({ "role": "system", "content": sys }));
        }

        for m in history {
            match m.msg_type {
                MsgType::Msg => match m.role {
                    Role::User => messages.push(json!({ "role": "user", "content": m.content })),
                    Role::Assistant => messages.push(json!({ "role": "assistant", "content": m.content })),
                    Role::System => {} // the leading system message above already covers this
                },
                MsgType::ToolCall => messages.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": [{
                        "id": m.tool_use_id.clone().unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": m.tool_name.clone().unwrap_or_default(),
                            "arguments": m.content,
                        },
                    }],
                })),
                MsgType::ToolResult => messages.push(json!({
                    "role": "tool",
                    "tool_call_id": m.tool_use_id.clone().unwrap_or_default(),
                    "content": m.content,
                })),
                _ => {}
            }
        }

        let mut body = json!({ "model": model, "messages": messages });
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = json!(tool_defs);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedResponse, AdapterError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| AdapterError::MalformedResponse { provider: "openai".into(), reason: "missing choices[0]".into() })?;
        let message = choice.get("message").ok_or_else(|| AdapterError::MalformedResponse {
            provider: "openai".into(),
            reason: "missing choices[0].message".into(),
        })?;
        let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str()).unwrap_or("");

        let mut messages = Vec::new();
        if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                messages.push(Message::msg(Role::Assistant, text));
            }
        }

        let mut has_tool_calls = false;
        if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tool_calls {
                has_tool_calls = true;
                let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let function = tc.get("function").ok_or_else(|| AdapterError::MalformedResponse {
                    provider: "openai".into(),
                    reason: "tool_call missing function".into(),
                })?;
                let name = function.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let args = function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
                messages.push(Message::tool_call(id, name, args));
            }
        }

        let usage = extract_usage(body.get("usage"));
        let stopped = finish_reason == "stop" && !has_tool_calls;

        Ok(ParsedResponse { messages, usage, stopped })
    }
}

fn extract_usage(usage: Option<&Value>) -> TokenUsage {
    let Some(usage) = usage else { return TokenUsage::default() };
    let input = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cache_read = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let non_cache_read = input.saturating_sub(cache_read);

    let mut u = TokenUsage::new(input, output);
    u.input_breakdown.cache_read = cache_read;
    u.input_breakdown.non_cache_read = non_cache_read;
    u
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_round_trips_in_order() {
        let adapter = OpenAiAdapter::new();
        let history = vec![
            Message::msg(Role::User, "hi"),
            Message::tool_call("call_1", "lookup", "{}"),
            Message::tool_result("call_1", "lookup", r#"{"output":"ok"}"#),
            Message::msg(Role::Assistant, "done"),
        ];
        let body = adapter.build_request("gpt-4o", &history, &[], None, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "lookup");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["role"], "assistant");
    }

    #[test]
    fn stop_requires_no_pending_tool_calls() {
        let adapter = OpenAiAdapter::new();
        let body = json!({
            "choices": [{ "finish_reason": "stop", "message": { "content": "hello" } }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 },
        });
        let parsed = adapter.parse_response(&body).unwrap();
        assert!(parsed.stopped);
        assert_eq!(parsed.usage.input, 100);
        assert_eq!(parsed.usage.output, 50);
    }

    #[test]
    fn tool_calls_prevent_stop() {
        let adapter = OpenAiAdapter::new();
        let body = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": { "content": null, "tool_calls": [{
                    "id": "call_1", "function": { "name": "x", "arguments": "{}" }
                }]},
            }],
        });
        let parsed = adapter.parse_response(&body).unwrap();
        assert!(!parsed.stopped);
        assert_eq!(parsed.messages.len(), 1);
    }
}
