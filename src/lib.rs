// src/lib.rs

// Legacy-named module kept for the built-in tools and the HTTP connection
// pool; the rest of the crate lives at the top level below.
pub mod cloudllm;

pub mod config;
pub mod cost;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod mcp_client;
pub mod message;
pub mod provider;
pub mod record;
pub mod stream;
pub mod tool_schema;
pub mod transport;

// Re-exporting the crate's main surface for easier external access, so a
// caller can write `convoy_core::Request` instead of `convoy_core::driver::Request`.
pub use cost::{TokenCost, TokenUsage};
pub use driver::{CancelToken, EventCallback, ProviderHttpClient, Request, Response};
pub use error::{AdapterError, ConfigError, ConvoyError, StreamError, ToolError, TransportError};
pub use message::{Message, MsgType, Role, ToolCall, ToolResult, UnifiedTool};
pub use stream::{Demultiplexer, FrameSink, StreamPair};

/// Run one [`Request`] to completion using the given provider HTTP client.
/// Thin re-export of [`driver::run`] so callers don't need the submodule path
/// for the single function they call most.
pub use driver::run;
