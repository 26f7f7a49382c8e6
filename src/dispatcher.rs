//! Tool dispatcher (C3): resolves one tool call to exactly one execution target
//! and normalizes its outcome to a [`ToolResult`] (§4.3).
//!
//! Resolution order for a single call is fixed: a Request-level [`ToolCallback`]
//! gets first refusal, then the [`ToolInfoMapping`] entry's own `handle` (if any),
//! then its `command` (sub-process), then `builtin`, then `mcp_client`. If nothing
//! resolves and a stream-pair is attached, the call is delegated to the peer
//! (§4.5); otherwise it fails with the fixed message the driver records verbatim
//! (§8 Testable Properties, scenario 4: `"tool execution failed: <name>"`).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::cloudllm::tools::{BashTool, Calculator, FileSystemTool, HttpClient, Memory, Platform};
use crate::error::{AdapterError, ConfigError, ToolError};
use crate::mcp_client::McpClient;
use crate::message::{ToolCall, ToolResult, UnifiedTool};
use crate::stream::StreamPair;

/// Outcome of a [`ToolCallback`]/[`ToolHandler`] invocation (§4.3 step 1/2a):
/// `handled = true` means "use `result` regardless of whether it carries an
/// error"; `handled = false` means "fall through to the next resolution step".
pub struct CallbackOutcome {
    pub handled: bool,
    pub result: ToolResult,
}

impl CallbackOutcome {
    pub fn handled(result: ToolResult) -> Self {
        CallbackOutcome { handled: true, result }
    }

    pub fn not_handled() -> Self {
        CallbackOutcome { handled: false, result: ToolResult::failure("") }
    }
}

/// A Request-level escape hatch that gets first refusal on every tool call
/// before the [`ToolInfoMapping`] is even consulted (§4.3 step 1).
#[async_trait]
pub trait ToolCallback: Send + Sync {
    async fn call(&self, call: &ToolCall) -> CallbackOutcome;
}

/// An inline callback attached directly to one [`UnifiedTool`] entry (§3
/// `UnifiedTool.handle`); takes priority over `command` and `builtin` for that
/// tool's own calls (§4.3 step 2).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, call: &ToolCall) -> CallbackOutcome;
}

pub type ToolHandle = Arc<dyn ToolHandler>;

/// Resolution metadata for one registered tool name (§3 `ToolInfoMapping`).
/// Exactly one resolution path should be populated; `UnifiedTool::handle`
/// (carried alongside `schema`) wins over `command`, which wins over `builtin`.
#[derive(Clone)]
pub struct ToolInfo {
    pub name: String,
    pub builtin: Option<String>,
    pub schema: UnifiedTool,
    pub mcp_server: Option<String>,
}

/// `name → ToolInfo`, built once in C4 pre-flight from custom tool files, inline
/// JSON tools, selected built-in names, and MCP-advertised tools. Registration
/// fails (§3, §8) if any two sources declare the same name.
#[derive(Default, Clone)]
pub struct ToolInfoMapping {
    entries: HashMap<String, ToolInfo>,
}

impl ToolInfoMapping {
    pub fn new() -> Self {
        ToolInfoMapping { entries: HashMap::new() }
    }

    /// Register one tool. Fails if `name` is already present (§3 invariant, §8
    /// scenario 6: duplicate registration is a configuration error caught
    /// before any provider call).
    pub fn register(&mut self, info: ToolInfo) -> Result<(), ConfigError> {
        if self.entries.contains_key(&info.name) {
            return Err(ConfigError::DuplicateTool { name: info.name });
        }
        self.entries.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolInfo> {
        self.entries.get(name)
    }

    pub fn tools(&self) -> Vec<&UnifiedTool> {
        self.entries.values().map(|i| &i.schema).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The concrete built-in tool instances a Request may dispatch to by fixed name
/// (§ambient tools: `calculator`, `http_client`, `memory`, `bash`, `filesystem`).
/// Constructed once per Request and shared across every round.
#[derive(Default)]
pub struct Builtins {
    pub calculator: Option<Calculator>,
    pub http_client: Option<HttpClient>,
    pub memory: Option<Memory>,
    pub bash: Option<BashTool>,
    pub filesystem: Option<FileSystemTool>,
}

impl Builtins {
    /// Construct the subset of built-ins named in `selected`, each with its
    /// default (un-sandboxed beyond defaults) configuration. Callers that need
    /// tighter sandboxing (root-restricted filesystem, bash allow/deny lists)
    /// should build `Builtins` directly instead of going through this helper.
    pub fn select(selected: &[String]) -> Self {
        let mut b = Builtins::default();
        for name in selected {
            match name.as_str() {
                "calculator" => b.calculator = Some(Calculator::new()),
                "http_client" => b.http_client = Some(HttpClient::new()),
                "memory" => b.memory = Some(Memory::new()),
                "bash" => b.bash = Some(BashTool::new(Platform::Linux)),
                "filesystem" => b.filesystem = Some(FileSystemTool::new()),
                _ => {}
            }
        }
        b
    }

    async fn invoke(&self, name: &str, raw_args: &str, _default_workspace_root: Option<&str>) -> Result<ToolResult, ToolError> {
        match name {
            "calculator" => {
                let tool = self.calculator.as_ref().ok_or_else(|| ToolError::unresolved(name))?;
                let expr = extract_str_field(raw_args, "expression").unwrap_or_else(|| raw_args.to_string());
                match tool.evaluate(&expr).await {
                    Ok(r) => Ok(ToolResult::ok(serde_json::json!({ "result": r }))),
                    Err(e) => Err(ToolError::Other(e.to_string())),
                }
            }
            "memory" => {
                let tool = self.memory.as_ref().ok_or_else(|| ToolError::unresolved(name))?;
                Ok(run_memory_command(tool, raw_args))
            }
            "bash" => {
                let tool = self.bash.as_ref().ok_or_else(|| ToolError::unresolved(name))?;
                let cmd = extract_str_field(raw_args, "command").unwrap_or_else(|| raw_args.to_string());
                match tool.execute(&cmd).await {
                    Ok(r) => Ok(ToolResult::ok(serde_json::json!({
                        "stdout": r.stdout,
                        "stderr": r.stderr,
                        "exit_code": r.exit_code,
                        "success": r.success,
                    }))),
                    Err(e) => Err(ToolError::Other(e.to_string())),
                }
            }
            "http_client" => {
                let tool = self.http_client.as_ref().ok_or_else(|| ToolError::unresolved(name))?;
                run_http_command(tool, raw_args).await
            }
            "filesystem" => {
                let tool = self.filesystem.as_ref().ok_or_else(|| ToolError::unresolved(name))?;
                run_filesystem_command(tool, raw_args).await
            }
            _ => Err(ToolError::unresolved(name)),
        }
    }
}

fn extract_str_field(raw_args: &str, field: &str) -> Option<String> {
    let v: Value = serde_json::from_str(raw_args).ok()?;
    v.get(field)?.as_str().map(|s| s.to_string())
}

fn run_memory_command(tool: &Memory, raw_args: &str) -> ToolResult {
    let command = extract_str_field(raw_args, "command").unwrap_or_else(|| raw_args.trim().to_string());
    let mut parts = command.splitn(2, ' ');
    let op = parts.next().unwrap_or("").to_uppercase();
    let rest = parts.next().unwrap_or("").trim();
    match op.as_str() {
        "P" => {
            let mut fields = rest.splitn(3, ' ');
            let key = fields.next().unwrap_or("").to_string();
            let value = fields.next().unwrap_or("").to_string();
            let ttl = fields.next().and_then(|s| s.parse::<u64>().ok());
            tool.put(key, value, ttl);
            ToolResult::ok(serde_json::json!({"output": "OK"}))
        }
        "G" => match tool.get(rest, false) {
            Some((value, _)) => ToolResult::ok(serde_json::json!({"output": value})),
            None => ToolResult::failure(format!("key not found: {rest}")),
        },
        "L" => ToolResult::ok(serde_json::json!({"keys": tool.list_keys()})),
        "D" => {
            tool.delete(rest);
            ToolResult::ok(serde_json::json!({"output": "OK"}))
        }
        "C" => {
            tool.clear();
            ToolResult::ok(serde_json::json!({"output": "OK"}))
        }
        _ => ToolResult::failure(format!("unknown memory command: {op}")),
    }
}

async fn run_http_command(tool: &HttpClient, raw_args: &str) -> Result<ToolResult, ToolError> {
    let v: Value = serde_json::from_str(raw_args)
        .map_err(|e| ToolError::InvalidArguments { tool: "http_client".into(), reason: e.to_string() })?;
    let method = v.get("method").and_then(|m| m.as_str()).unwrap_or("GET").to_uppercase();
    let url = v
        .get("url")
        .and_then(|u| u.as_str())
        .ok_or_else(|| ToolError::InvalidArguments { tool: "http_client".into(), reason: "missing url".into() })?;
    let body = v.get("body").cloned();
    let result = match method.as_str() {
        "GET" => tool.get(url).await,
        "DELETE" => tool.delete(url).await,
        "HEAD" => tool.head(url).await,
        "POST" => tool.post(url, body.unwrap_or(Value::Null)).await,
        "PUT" => tool.put(url, body.unwrap_or(Value::Null)).await,
        "PATCH" => tool.patch(url, body.unwrap_or(Value::Null)).await,
        other => return Err(ToolError::InvalidArguments { tool: "http_client".into(), reason: format!("unsupported method {other}") }),
    };
    match result {
        Ok(resp) => Ok(ToolResult::ok(serde_json::json!({
            "status": resp.status,
            "body": resp.body,
        }))),
        Err(e) => Err(ToolError::Other(e.to_string())),
    }
}

async fn run_filesystem_command(tool: &FileSystemTool, raw_args: &str) -> Result<ToolResult, ToolError> {
    let v: Value = serde_json::from_str(raw_args)
        .map_err(|e| ToolError::InvalidArguments { tool: "filesystem".into(), reason: e.to_string() })?;
    let op = v.get("operation").and_then(|o| o.as_str()).unwrap_or("read");
    let path = v.get("path").and_then(|p| p.as_str()).unwrap_or("");
    let outcome = match op {
        "read" => tool.read_file(path).await.map(|c| serde_json::json!({"content": c})),
        "write" => {
            let content = v.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();
            tool.write_file(path, &content).await.map(|_| serde_json::json!({"output": "OK"}))
        }
        "append" => {
            let content = v.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();
            tool.append_file(path, &content).await.map(|_| serde_json::json!({"output": "OK"}))
        }
        "delete" => tool.delete_file(path).await.map(|_| serde_json::json!({"output": "OK"})),
        "list" => {
            let recursive = v.get("recursive").and_then(|r| r.as_bool()).unwrap_or(false);
            tool.read_directory(path, recursive).await.map(|entries| {
                let json_entries: Vec<Value> = entries
                    .into_iter()
                    .map(|e| serde_json::json!({"name": e.name, "is_directory": e.is_directory, "size": e.size}))
                    .collect();
                serde_json::json!({ "entries": json_entries })
            })
        }
        "exists" => tool.file_exists(path).await.map(|b| serde_json::json!({"exists": b})),
        other => return Err(ToolError::InvalidArguments { tool: "filesystem".into(), reason: format!("unsupported operation {other}") }),
    };
    outcome.map(ToolResult::ok).map_err(|e| ToolError::Other(e.to_string()))
}

/// Parse `raw_args` as a JSON object, rejecting trailing-junk (serde_json always
/// does this for a single `from_str` parse) and duplicate top-level keys (§4.3
/// "Argument parsing") which serde_json's default `Map` would otherwise silently
/// let the last occurrence win.
pub fn parse_tool_arguments(raw_args: &str) -> Result<serde_json::Map<String, Value>, AdapterError> {
    let trimmed = raw_args.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::Map::new());
    }
    check_no_duplicate_top_level_keys(trimmed).map_err(|reason| AdapterError::InvalidToolArguments {
        tool_name: String::new(),
        reason,
    })?;
    let value: Value = serde_json::from_str(trimmed).map_err(|e| AdapterError::InvalidToolArguments {
        tool_name: String::new(),
        reason: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(serde_json::Map::new()),
        other => Err(AdapterError::InvalidToolArguments {
            tool_name: String::new(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

/// Hand-rolled single-pass scan for duplicate keys at the top level of a JSON
/// object literal. Nested objects/arrays are skipped over by depth-tracking
/// rather than recursively checked — malformed nested JSON is still caught by
/// the subsequent `serde_json::from_str` parse.
fn check_no_duplicate_top_level_keys(s: &str) -> Result<(), String> {
    let bytes = s.as_bytes();
    let mut i = 0usize;
    let mut depth = 0i32;
    let mut seen: Vec<String> = Vec::new();
    let mut expect_key = false;
    while i < bytes.len() {
        match bytes[i] as char {
            '{' => {
                depth += 1;
                expect_key = depth == 1;
                i += 1;
            }
            '}' => {
                depth -= 1;
                i += 1;
            }
            '[' => {
                depth += 1;
                i += 1;
            }
            ']' => {
                depth -= 1;
                i += 1;
            }
            '"' if depth == 1 && expect_key => {
                let (key, next) = read_json_string(bytes, i).map_err(|e| e.to_string())?;
                if seen.contains(&key) {
                    return Err(format!("duplicate key: {key}"));
                }
                seen.push(key);
                i = next;
                expect_key = false;
            }
            '"' => {
                let (_, next) = read_json_string(bytes, i).unwrap_or((String::new(), i + 1));
                i = next;
            }
            ',' if depth == 1 => {
                expect_key = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(())
}

fn read_json_string(bytes: &[u8], start: usize) -> Result<(String, usize), &'static str> {
    if bytes.get(start) != Some(&b'"') {
        return Err("not a string");
    }
    let mut i = start + 1;
    let mut out = String::new();
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Ok((out, i + 1)),
            b'\\' => {
                if let Some(&next) = bytes.get(i + 1) {
                    out.push(next as char);
                    i += 2;
                } else {
                    return Err("unterminated escape");
                }
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    Err("unterminated string")
}

/// Substitute `$var`/`${var}` placeholders in an argv template from call
/// arguments (§4.3 "command" resolution path).
fn substitute_argv(template: &[String], args: &serde_json::Map<String, Value>) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            let mut out = part.clone();
            for (k, v) in args {
                let value_str = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&format!("${{{k}}}"), &value_str);
                out = out.replace(&format!("${k}"), &value_str);
            }
            out
        })
        .collect()
}

async fn run_command(argv: &[String], working_dir: Option<&str>, args: &serde_json::Map<String, Value>) -> Result<ToolResult, ToolError> {
    let resolved = substitute_argv(argv, args);
    let (prog, rest) = resolved.split_first().ok_or_else(|| ToolError::Other("empty command template".into()))?;
    let mut cmd = Command::new(prog);
    cmd.args(rest).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await.map_err(|e| ToolError::Other(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ToolError::Other(format!("command exited with {}: {stderr}", output.status)));
    }
    match serde_json::from_str::<Value>(&stdout) {
        Ok(Value::Object(_)) => Ok(ToolResult::ok(serde_json::from_str(&stdout).unwrap())),
        _ => Ok(ToolResult::ok(serde_json::json!({ "output": stdout }))),
    }
}

/// Everything the dispatcher needs beyond the call itself: the registered
/// tools, the built-in instances, an optional MCP client, an optional
/// Request-level callback, and an optional stream-pair for delegation (§4.3).
pub struct DispatchContext<'a> {
    pub tools: &'a ToolInfoMapping,
    pub builtins: &'a Builtins,
    pub mcp_client: Option<&'a Arc<dyn McpClient>>,
    pub callback: Option<&'a Arc<dyn ToolCallback>>,
    pub stream: Option<&'a StreamPair>,
    pub default_workspace_root: Option<&'a str>,
}

/// Resolve and execute one tool call, returning the normalized [`ToolResult`]
/// that becomes the emitted `tool_result` event's content/error (§4.3, §4.4
/// step 2). Never returns `Err` — an unresolved or failing call is still a
/// *recorded* tool error (§7), not a driver-aborting one.
pub async fn dispatch(call: &ToolCall, ctx: &DispatchContext<'_>) -> ToolResult {
    if let Some(cb) = ctx.callback {
        let outcome = cb.call(call).await;
        if outcome.handled {
            return outcome.result;
        }
    }

    if let Some(info) = ctx.tools.get(&call.name) {
        if let Some(handle) = &info.schema.handle {
            let outcome = handle.call(call).await;
            if outcome.handled {
                return outcome.result;
            }
        } else if let Some(argv) = &info.schema.command {
            return match run_command(argv, call.working_dir.as_deref(), &call.arguments).await {
                Ok(r) => r,
                Err(e) => ToolResult::failure(e.to_string()),
            };
        } else if let Some(builtin_name) = &info.builtin {
            return match ctx.builtins.invoke(builtin_name, &call.raw_args, ctx.default_workspace_root).await {
                Ok(r) => r,
                Err(e) => ToolResult::failure(e.to_string()),
            };
        } else if let (Some(server), Some(mcp)) = (&info.mcp_server, ctx.mcp_client) {
            let _ = server;
            return match mcp.call_tool(&call.name, &call.raw_args).await {
                Ok(v) => ToolResult::ok(v),
                Err(e) => ToolResult::failure(e.to_string()),
            };
        }
    }

    if let Some(stream) = ctx.stream {
        return match stream.request_tool(&call.name, &call.raw_args, ctx.default_workspace_root).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.into_tool_error().to_string()),
        };
    }

    ToolResult::failure(ToolError::unresolved(&call.name).to_string())
}
