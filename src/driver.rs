//! Conversation driver (C4): pre-flight setup, the bounded round loop, and
//! post-flight cost accounting (§4.4). This is the one piece every transport
//! (C6/C7) and every direct caller goes through — it is the engine itself.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{resolve_base_url, resolve_token_from_env};
use crate::cost::{TokenCost, TokenUsage};
use crate::dispatcher::{dispatch, Builtins, DispatchContext, ToolCallback, ToolInfo, ToolInfoMapping};
use crate::error::{ConfigError, ConvoyError, TransportError};
use crate::mcp_client::McpClient;
use crate::message::{Message, MsgType, Role, ToolCall, UnifiedTool};
use crate::provider::{anthropic::AnthropicAdapter, gemini::GeminiAdapter, openai::OpenAiAdapter, cost_for_usage, resolve_shape, ProviderAdapter, ProviderShape};
use crate::stream::StreamPair;

/// Invoked synchronously, once per emitted [`Message`], in the driver's own
/// thread — callback order matches observable conversation order (§4.4 "Event
/// emission").
pub type EventCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// The one suspension point the core doesn't implement itself: the actual
/// provider HTTP call (§1 "Out of scope": provider HTTP clients themselves).
/// Callers inject an implementation; tests use a scripted fake.
#[async_trait]
pub trait ProviderHttpClient: Send + Sync {
    /// `model` is passed alongside `body` because Gemini's wire format puts
    /// the model in the request URL (`/models/{model}:generateContent`)
    /// rather than in the JSON body the adapter builds — the other two
    /// shapes already carry it in `body["model"]`, but a caller building the
    /// actual HTTP request needs it uniformly available without inspecting
    /// `body` per-shape.
    async fn call(&self, shape: ProviderShape, model: &str, base_url: &str, token: &str, body: Value) -> Result<Value, TransportError>;
}

/// A cooperative cancellation flag (§5 "Cancellation"): checked at every
/// suspension point; in-flight tool calls receive the same token.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one conversation turn needs (§3 "A Request is single-use").
///
/// `Clone` is derived so transports (C6/C7) can keep one fully-configured
/// template (model, tools, callbacks, ...) around and clone it per
/// connection/process, filling in `history`/`stream_pair`/`event_callback`
/// fresh each time — the template itself is never run twice.
#[derive(Clone)]
pub struct Request {
    pub model: String,
    pub token: Option<String>,
    pub base_url: Option<String>,
    pub user_message: String,
    pub history: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<UnifiedTool>,
    pub builtin_tool_names: Vec<String>,
    pub mcp_client: Option<Arc<dyn McpClient>>,
    pub tool_callback: Option<Arc<dyn ToolCallback>>,
    pub no_cache: bool,
    /// Defaults to 1 (a single round, no auto-continuation). Values > 1
    /// declare "agent mode" (§4.4, GLOSSARY).
    pub max_rounds: u32,
    pub default_workspace_root: Option<String>,
    pub stream_pair: Option<StreamPair>,
    pub event_callback: EventCallback,
    pub cancel: Option<CancelToken>,
}

impl Request {
    pub fn new(model: impl Into<String>, user_message: impl Into<String>, event_callback: EventCallback) -> Self {
        Request {
            model: model.into(),
            token: None,
            base_url: None,
            user_message: user_message.into(),
            history: Vec::new(),
            system_prompt: None,
            tools: Vec::new(),
            builtin_tool_names: Vec::new(),
            mcp_client: None,
            tool_callback: None,
            no_cache: false,
            max_rounds: 1,
            default_workspace_root: None,
            stream_pair: None,
            event_callback,
            cancel: None,
        }
    }
}

/// What the driver hands back once the round loop ends (§4.4 "Post-flight").
#[derive(Debug, Clone)]
pub struct Response {
    pub total_usage: TokenUsage,
    pub total_cost: TokenCost,
    pub rounds_used: u32,
    pub last_assistant_message: Option<String>,
}

fn adapter_for(shape: ProviderShape) -> Box<dyn ProviderAdapter> {
    match shape {
        ProviderShape::OpenAI => Box::new(OpenAiAdapter::new()),
        ProviderShape::Anthropic => Box::new(AnthropicAdapter::new()),
        ProviderShape::Gemini => Box::new(GeminiAdapter::new()),
    }
}

/// Read a system prompt value as-is, unless it names an existing file — in
/// which case that file's contents are loaded instead (§6 "System-prompt
/// input", §4.4 pre-flight step 4's `@file(path)` shorthand).
async fn resolve_system_prompt(raw: &str) -> String {
    let path_str = raw.strip_prefix("@file(").and_then(|s| s.strip_suffix(')')).unwrap_or(raw);
    let path = Path::new(path_str);
    if path.is_file() {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => return contents,
            Err(e) => log::warn!("system prompt path {path_str:?} failed to load: {e}, using raw value"),
        }
    }
    raw.to_string()
}

/// Build the `ToolInfoMapping` from custom/inline tools, selected built-in
/// names, and (if attached) an MCP server's advertised catalog (§4.4 pre-
/// flight step 3). Duplicate names across any of these sources fail here,
/// before any provider call (§3, §8 scenario 6).
async fn build_tool_mapping(request: &Request) -> Result<(ToolInfoMapping, Builtins), ConfigError> {
    let mut mapping = ToolInfoMapping::new();

    for name in &request.builtin_tool_names {
        let schema = UnifiedTool::new(name.clone(), format!("built-in {name} tool"), serde_json::json!({"type":"object"}));
        mapping.register(ToolInfo { name: name.clone(), builtin: Some(name.clone()), schema, mcp_server: None })?;
    }

    for tool in &request.tools {
        mapping.register(ToolInfo { name: tool.name.clone(), builtin: None, schema: tool.clone(), mcp_server: None })?;
    }

    if let Some(mcp) = &request.mcp_client {
        match mcp.list_tools().await {
            Ok(advertised) => {
                for meta in advertised {
                    let name = meta.name.clone();
                    let schema = meta.into_unified_tool();
                    mapping.register(ToolInfo { name: name.clone(), builtin: None, schema, mcp_server: Some(name) })?;
                }
            }
            Err(e) => log::warn!("MCP tool catalog fetch failed, continuing without it: {e}"),
        }
    }

    let builtins = Builtins::select(&request.builtin_tool_names);
    Ok((mapping, builtins))
}

/// Run one Request to completion: pre-flight, the bounded round loop, and
/// post-flight cost accounting (§4.4). This is the entry point every
/// transport and direct caller goes through.
pub async fn run(mut request: Request, http_client: Arc<dyn ProviderHttpClient>) -> Result<Response, ConvoyError> {
    // --- Pre-flight (§4.4) ---
    let shape = resolve_shape(&request.model)?;
    let token = request
        .token
        .clone()
        .or_else(|| resolve_token_from_env(shape))
        .ok_or_else(|| ConfigError::MissingToken { provider: shape.env_prefix().to_string() })?;
    let base_url = resolve_base_url(shape, request.base_url.as_deref());

    let (tool_mapping, builtins) = build_tool_mapping(&request).await?;
    let adapter = adapter_for(shape);
    let cache_enabled = !request.no_cache;

    let system_prompt = match &request.system_prompt {
        Some(raw) => Some(resolve_system_prompt(raw).await),
        None => None,
    };

    // Pulled into locals up front so the round loop below never needs to
    // borrow `request` piecemeal alongside a capturing closure.
    let model = request.model.clone();
    let event_callback = request.event_callback.clone();
    let mcp_client = request.mcp_client.clone();
    let tool_callback = request.tool_callback.clone();
    let stream_pair = request.stream_pair.clone();
    let default_workspace_root = request.default_workspace_root.clone();
    let max_rounds = request.max_rounds.max(1);
    let cancel = request.cancel.clone();

    fn emit(history: &mut Vec<Message>, callback: &EventCallback, msg: Message) {
        callback(&msg);
        history.push(msg);
    }

    let mut history = std::mem::take(&mut request.history);
    emit(&mut history, &event_callback, Message::cache_info(&model, cache_enabled));
    emit(&mut history, &event_callback, Message::msg(Role::User, request.user_message.clone()));

    let tools: Vec<UnifiedTool> = tool_mapping.tools().into_iter().cloned().collect();

    let mut total_usage = TokenUsage::default();
    let mut round: u32 = 0;
    let mut last_assistant_message: Option<String> = None;

    // --- Round loop (§4.4) ---
    while round < max_rounds {
        if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(ConvoyError::Cancelled);
        }

        let body = adapter.build_request(&model, &history, &tools, system_prompt.as_deref(), cache_enabled);
        let response_body = http_client.call(shape, &model, &base_url, &token, body).await?;
        let parsed = adapter.parse_response(&response_body)?;

        let mut tool_calls_this_round = 0u32;
        for msg in parsed.messages {
            match msg.msg_type {
                MsgType::Msg => {
                    last_assistant_message = Some(msg.content.clone());
                    emit(&mut history, &event_callback, msg);
                }
                MsgType::ToolCall => {
                    tool_calls_this_round += 1;
                    let tool_name = msg.tool_name.clone().unwrap_or_default();
                    let tool_use_id = msg.tool_use_id.clone().unwrap_or_default();
                    let raw_args = msg.content.clone();
                    emit(&mut history, &event_callback, msg);

                    let arguments = crate::dispatcher::parse_tool_arguments(&raw_args).unwrap_or_default();
                    let call = ToolCall {
                        id: tool_use_id.clone(),
                        name: tool_name.clone(),
                        arguments,
                        raw_args,
                        working_dir: default_workspace_root.clone(),
                    };
                    let ctx = DispatchContext {
                        tools: &tool_mapping,
                        builtins: &builtins,
                        mcp_client: mcp_client.as_ref(),
                        callback: tool_callback.as_ref(),
                        stream: stream_pair.as_ref(),
                        default_workspace_root: default_workspace_root.as_deref(),
                    };
                    let result = dispatch(&call, &ctx).await;
                    let content = result.error.clone().unwrap_or_else(|| result.full_content());
                    let result_msg = Message::tool_result(tool_use_id, tool_name, content);
                    emit(&mut history, &event_callback, result_msg);
                }
                _ => {}
            }
        }

        total_usage = total_usage.add(&parsed.usage);
        emit(&mut history, &event_callback, Message::token_usage_event(parsed.usage));

        let terminated = parsed.stopped && tool_calls_this_round == 0;
        if terminated {
            if let Some(stream) = stream_pair.clone() {
                match stream.request_user_msg().await {
                    Ok(Some(follow_up)) => {
                        emit(&mut history, &event_callback, Message::msg(Role::User, follow_up));
                        continue; // follow-up doesn't consume a round (§4.4 step 5)
                    }
                    Ok(None) => break, // peer has nothing more (stream_end)
                    Err(e) => {
                        log::warn!("follow-up solicitation failed: {e}");
                        break;
                    }
                }
            } else {
                break;
            }
        }

        round += 1;
    }

    let total_cost = cost_for_usage(&request.model, &total_usage);
    Ok(Response { total_usage, total_cost, rounds_used: round.max(1), last_assistant_message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ProviderHttpClient for ScriptedClient {
        async fn call(&self, _shape: ProviderShape, _model: &str, _base_url: &str, _token: &str, _body: Value) -> Result<Value, TransportError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TransportError::Http("scripted client exhausted".into()));
            }
            Ok(responses.remove(0))
        }
    }

    fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<Message>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let cb: EventCallback = Arc::new(move |msg: &Message| events_clone.lock().unwrap().push(msg.clone()));
        (cb, events)
    }

    #[tokio::test]
    async fn cache_info_is_first_event_enabled() {
        let (cb, events) = collecting_callback();
        let mut request = Request::new("gpt-4o", "Hello", cb);
        request.token = Some("sk-test".into());
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![serde_json::json!({
                "choices": [{ "finish_reason": "stop", "message": { "content": "hi there" } }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5 },
            })]),
        });
        let response = run(request, client).await.unwrap();
        assert_eq!(response.last_assistant_message.as_deref(), Some("hi there"));

        let events = events.lock().unwrap();
        assert_eq!(events[0].msg_type, MsgType::CacheInfo);
        assert_eq!(events[0].content, "Prompt cache enabled with gpt-4o");
        assert_eq!(events[0].metadata["cache_info"]["cache_enabled"], true);
    }

    #[tokio::test]
    async fn cache_info_disabled() {
        let (cb, events) = collecting_callback();
        let mut request = Request::new("gpt-4o", "Hello", cb);
        request.token = Some("sk-test".into());
        request.no_cache = true;
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![serde_json::json!({
                "choices": [{ "finish_reason": "stop", "message": { "content": "hi" } }],
            })]),
        });
        run(request, client).await.unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events[0].content, "Prompt cache disabled with gpt-4o");
        assert_eq!(events[0].metadata["cache_info"]["cache_enabled"], false);
    }

    #[tokio::test]
    async fn token_usage_accumulates_across_rounds() {
        let (cb, _events) = collecting_callback();
        let mut request = Request::new("gpt-4o", "do two things", cb);
        request.token = Some("sk-test".into());
        request.max_rounds = 2;
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                serde_json::json!({
                    "choices": [{
                        "finish_reason": "tool_calls",
                        "message": { "content": null, "tool_calls": [{ "id": "1", "function": { "name": "noop", "arguments": "{}" } }] },
                    }],
                    "usage": { "prompt_tokens": 100, "completion_tokens": 50 },
                }),
                serde_json::json!({
                    "choices": [{ "finish_reason": "stop", "message": { "content": "done" } }],
                    "usage": { "prompt_tokens": 200, "completion_tokens": 100 },
                }),
            ]),
        });
        let response = run(request, client).await.unwrap();
        assert_eq!(response.total_usage.input, 300);
        assert_eq!(response.total_usage.output, 150);
        assert_eq!(response.total_usage.total, 450);
    }

    #[tokio::test]
    async fn unresolved_tool_records_error_and_continues() {
        let (cb, events) = collecting_callback();
        let mut request = Request::new("gpt-4o", "call foo", cb);
        request.token = Some("sk-test".into());
        request.max_rounds = 2;
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                serde_json::json!({
                    "choices": [{
                        "finish_reason": "tool_calls",
                        "message": { "content": null, "tool_calls": [{ "id": "1", "function": { "name": "foo", "arguments": "{}" } }] },
                    }],
                }),
                serde_json::json!({ "choices": [{ "finish_reason": "stop", "message": { "content": "ok" } }] }),
            ]),
        });
        run(request, client).await.unwrap();
        let events = events.lock().unwrap();
        let tool_result = events.iter().find(|m| m.msg_type == MsgType::ToolResult).unwrap();
        assert_eq!(tool_result.content, "tool execution failed: foo");
    }

    #[tokio::test]
    async fn duplicate_tool_registration_is_a_configuration_error_before_any_call() {
        let (cb, _events) = collecting_callback();
        let mut request = Request::new("gpt-4o", "hi", cb);
        request.token = Some("sk-test".into());
        request.tools = vec![
            UnifiedTool::new("x", "one", serde_json::json!({})),
            UnifiedTool::new("x", "two", serde_json::json!({})),
        ];
        let client = Arc::new(ScriptedClient { responses: Mutex::new(vec![]) });
        let result = run(request, client).await;
        assert!(matches!(result, Err(ConvoyError::Configuration(ConfigError::DuplicateTool { .. }))));
    }

    #[tokio::test]
    async fn unknown_model_fails_before_any_provider_call() {
        let (cb, _events) = collecting_callback();
        let request = Request::new("not-a-real-model", "hi", cb);
        let client = Arc::new(ScriptedClient { responses: Mutex::new(vec![]) });
        let result = run(request, client).await;
        assert!(matches!(result, Err(ConvoyError::Configuration(ConfigError::UnknownModel { .. }))));
    }
}
