//! MCP client (ambient stack): the concrete HTTP client the dispatcher's
//! `mcp_client` resolution step (§4.3) calls into, and the short-TTL catalog
//! cache that keeps repeated dispatches from re-fetching the tool list every
//! round (SPEC_FULL §"Ambient stack").
//!
//! The wire contract is intentionally small: `GET {endpoint}/tools` returns an
//! array of tool metadata, `POST {endpoint}/execute {tool, parameters}` runs
//! one and returns its result. Both shapes are deserialized loosely (`Value`)
//! so a non-compliant server still degrades to a clear [`McpError`] rather than
//! a panic.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cloudllm::http_client_pool::get_or_create_client;
use crate::message::UnifiedTool;

#[derive(Debug, Error, Clone)]
pub enum McpError {
    #[error("MCP request failed: {0}")]
    Request(String),

    #[error("MCP server returned malformed response: {0}")]
    Malformed(String),
}

/// One tool as advertised by an MCP server's `/tools` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub parameters: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl McpToolMetadata {
    pub fn into_unified_tool(self) -> UnifiedTool {
        UnifiedTool::new(self.name, self.description, self.parameters)
    }
}

/// The seam the dispatcher calls into (§4.3 "MCP client"); kept as a trait so
/// tests can substitute a fake server without an HTTP round-trip.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolMetadata>, McpError>;
    async fn call_tool(&self, name: &str, raw_args_json: &str) -> Result<Value, McpError>;
}

/// Default TTL for the cached `/tools` listing: long enough that a round loop
/// dispatching several calls in the same Request doesn't refetch the catalog,
/// short enough that a server's tool set update is picked up promptly.
const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(30);

struct CachedCatalog {
    tools: Vec<McpToolMetadata>,
    fetched_at: Instant,
}

/// HTTP-backed MCP client for one server `endpoint`, with a TTL-cached tool
/// catalog (§4.3 "MCP client").
pub struct HttpMcpClient {
    endpoint: String,
    ttl: Duration,
    cache: Mutex<Option<CachedCatalog>>,
}

impl HttpMcpClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpMcpClient { endpoint: endpoint.into(), ttl: DEFAULT_CATALOG_TTL, cache: Mutex::new(None) }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn cached_fresh(&self) -> Option<Vec<McpToolMetadata>> {
        let guard = self.cache.lock().unwrap();
        guard.as_ref().and_then(|c| {
            if c.fetched_at.elapsed() < self.ttl {
                Some(c.tools.clone())
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolMetadata>, McpError> {
        if let Some(tools) = self.cached_fresh() {
            return Ok(tools);
        }
        let client = get_or_create_client(&self.endpoint);
        let url = format!("{}/tools", self.endpoint.trim_end_matches('/'));
        let resp = client.get(&url).send().await.map_err(|e| McpError::Request(e.to_string()))?;
        let tools: Vec<McpToolMetadata> = resp.json().await.map_err(|e| McpError::Malformed(e.to_string()))?;
        *self.cache.lock().unwrap() = Some(CachedCatalog { tools: tools.clone(), fetched_at: Instant::now() });
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, raw_args_json: &str) -> Result<Value, McpError> {
        let client = get_or_create_client(&self.endpoint);
        let url = format!("{}/execute", self.endpoint.trim_end_matches('/'));
        let parameters: Value = serde_json::from_str(raw_args_json).unwrap_or(Value::Null);
        let body = serde_json::json!({ "tool": name, "parameters": parameters });
        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| McpError::Request(e.to_string()))?;
        resp.json::<Value>().await.map_err(|e| McpError::Malformed(e.to_string()))
    }
}
