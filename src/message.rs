//! The canonical data model (C1): the single `Message` representation shared by
//! conversation history, the emitted event stream, and stream sub-protocol frames.
//!
//! Field names here form the external wire contract (§6 of the design): anything
//! serialized to a record file, to stdio, or to a WebSocket frame uses exactly this
//! shape. The struct is deliberately flat rather than a tagged enum per variant —
//! a pragmatic, JSON-friendly representation the rest of the crate builds on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cost::{TokenCost, TokenUsage};

/// Disjoint tag set for [`Message::msg_type`].
///
/// Conversation types (`Msg`, `ToolCall`, `ToolResult`) are "history-sendable": they
/// may be persisted to a record file and replayed as history on a later turn (§3,
/// §6). Telemetry and stream-protocol types are never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Msg,
    ToolCall,
    ToolResult,
    Info,
    Error,
    CacheInfo,
    StopReason,
    TokenUsage,
    StreamRequestTool,
    StreamResponseTool,
    StreamRequestUserMsg,
    StreamHandleAck,
    StreamEnd,
    StreamInitRequest,
    StreamInitEventsFinished,
}

impl MsgType {
    /// `msg`, `tool_call`, `tool_result` are the only types a caller may persist to
    /// a record file and feed back in as history (§3c, §6).
    pub fn is_history_sendable(&self) -> bool {
        matches!(self, MsgType::Msg | MsgType::ToolCall | MsgType::ToolResult)
    }
}

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// The single canonical record used for history, emitted events, and stream frames.
///
/// Invariant (b): for a given `msg_type`, exactly one of `content` alone, or the
/// triple `(tool_use_id, tool_name, content)`, is meaningful — callers should not
/// read fields outside what the `msg_type` implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cost: Option<TokenCost>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// RFC3339 wall-clock rendering of `timestamp`. Invariant (a): whenever
    /// `timestamp` is set, `time` is derived from it before emission — never set
    /// independently.
    pub time: String,
    pub timestamp: i64,
}

impl Message {
    fn now() -> (String, i64) {
        let now: DateTime<Utc> = Utc::now();
        (now.to_rfc3339(), now.timestamp())
    }

    fn base(msg_type: MsgType, role: Role, content: impl Into<String>) -> Self {
        let (time, timestamp) = Self::now();
        Message {
            msg_type,
            role,
            model: None,
            content: content.into(),
            tool_use_id: None,
            tool_name: None,
            stream_id: None,
            token_usage: None,
            token_cost: None,
            metadata: HashMap::new(),
            time,
            timestamp,
        }
    }

    /// Factory for a plain conversational message (`msg`), wall-clock time auto-filled.
    pub fn msg(role: Role, content: impl Into<String>) -> Self {
        Self::base(MsgType::Msg, role, content)
    }

    /// Factory for a `tool_call` message: the model requesting execution of `tool_name`.
    pub fn tool_call(tool_use_id: impl Into<String>, tool_name: impl Into<String>, args_json: impl Into<String>) -> Self {
        let mut m = Self::base(MsgType::ToolCall, Role::Assistant, args_json);
        m.tool_use_id = Some(tool_use_id.into());
        m.tool_name = Some(tool_name.into());
        m
    }

    /// Factory for a `tool_result` message correlating back to a `tool_call` by id.
    pub fn tool_result(tool_use_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(MsgType::ToolResult, Role::User, content);
        m.tool_use_id = Some(tool_use_id.into());
        m.tool_name = Some(tool_name.into());
        m
    }

    /// Factory for the pre-loop `cache_info` telemetry event (§4.4 step 5).
    pub fn cache_info(model: &str, cache_enabled: bool) -> Self {
        let content = format!(
            "Prompt cache {} with {}",
            if cache_enabled { "enabled" } else { "disabled" },
            model
        );
        let mut m = Self::base(MsgType::CacheInfo, Role::System, content);
        m.model = Some(model.to_string());
        let mut cache_info = HashMap::new();
        cache_info.insert("cache_enabled".to_string(), serde_json::json!(cache_enabled));
        m.metadata.insert("cache_info".to_string(), serde_json::json!(cache_info));
        m
    }

    /// Factory for a `token_usage` telemetry event emitted once per round (§4.4 step 3).
    pub fn token_usage_event(usage: TokenUsage) -> Self {
        let mut m = Self::base(MsgType::TokenUsage, Role::System, "");
        m.token_usage = Some(usage);
        m
    }

    /// Factory for an `error` telemetry event.
    pub fn error(content: impl Into<String>) -> Self {
        Self::base(MsgType::Error, Role::System, content)
    }

    /// True if this message type may be persisted/replayed as history (§3c).
    pub fn is_history_sendable(&self) -> bool {
        self.msg_type.is_history_sendable()
    }

    /// Structural equality over the fields the round-trip invariant cares about
    /// (§8): role, content, tool_use_id, tool_name — deliberately ignoring `time`/
    /// `timestamp` so a reloaded history compares equal to the one that was saved.
    pub fn same_conversational_shape(&self, other: &Message) -> bool {
        self.msg_type == other.msg_type
            && self.role == other.role
            && self.content == other.content
            && self.tool_use_id == other.tool_use_id
            && self.tool_name == other.tool_name
    }
}

/// Provider-agnostic tool schema given to the LLM, and the dispatcher's resolution
/// metadata for a call by that name (§3 `UnifiedTool`, `ToolInfoMapping`).
///
/// Exactly one of `command`/`handle` is the execution target; if both are set,
/// `handle` wins, then `command`, then built-in-by-name (§4.3).
#[derive(Clone)]
pub struct UnifiedTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Argv template with `$var`/`${var}` placeholders, substituted from call arguments.
    pub command: Option<Vec<String>>,
    /// Inline callback invoked in place of command/builtin/MCP resolution.
    pub handle: Option<crate::dispatcher::ToolHandle>,
}

impl UnifiedTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        UnifiedTool {
            name: name.into(),
            description: description.into(),
            parameters,
            command: None,
            handle: None,
        }
    }

    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command = Some(argv);
        self
    }

    pub fn with_handle(mut self, handle: crate::dispatcher::ToolHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// One tool call requested by the model, resolved by the dispatcher (§3 `ToolCall`).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub raw_args: String,
    pub working_dir: Option<String>,
}

/// Outcome of one resolved tool call (§3 `ToolResult`). Exactly one of `content`/
/// `error` is populated — enforced by the constructors, not by the type itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: serde_json::Value) -> Self {
        ToolResult { content: Some(content), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult { content: None, error: Some(error.into()) }
    }

    /// The full JSON-serialized content, unretouched — this is what gets
    /// recorded in history and sent back to the model (§4.3: "the full
    /// content is still passed back to the model and recorded").
    pub fn full_content(&self) -> String {
        match &self.content {
            Some(v) => v.to_string(),
            None => self.error.clone().unwrap_or_default(),
        }
    }

    /// Truncate `content` to 2048 characters with a `…` suffix, for callers
    /// that want a display-only rendering (e.g. a terminal UI) distinct from
    /// the full value recorded/sent to the model (§4.3, §9 open question c).
    pub fn display_content(&self) -> String {
        let full = self.full_content();
        if full.chars().count() > 2048 {
            let truncated: String = full.chars().take(2048).collect();
            format!("{truncated}…")
        } else {
            full
        }
    }
}
