//! Error taxonomy for the conversation core.
//!
//! Mirrors the *kinds* of failure the driver can produce rather than a grab-bag of
//! wrapped third-party errors: configuration problems are caught before any provider
//! call is made, transport/adapter failures abort the in-flight request, tool and
//! stream-delegation failures are recorded and the conversation continues.

use thiserror::Error;

/// Top-level error type returned by the conversation driver and its collaborators.
#[derive(Debug, Error)]
pub enum ConvoyError {
    /// Caught during pre-flight, before any provider call is issued. No events are
    /// emitted for a request that fails configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The provider HTTP call itself failed (connection, timeout, non-2xx status).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The provider returned a response the adapter could not translate back to the
    /// canonical model.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A stream-delegation request ended in a way the driver could not recover from
    /// (e.g. follow-up solicitation failed with no fallback).
    #[error("stream delegation error: {0}")]
    StreamDelegation(#[from] StreamError),

    /// The caller's cancellation signal fired while the request was in flight.
    #[error("request cancelled")]
    Cancelled,
}

/// Configuration errors: caught in C4 pre-flight, before any provider call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API token for provider {provider}")]
    MissingToken { provider: String },

    #[error("unrecognized model: {model}")]
    UnknownModel { model: String },

    #[error("duplicate tool registration: {name}")]
    DuplicateTool { name: String },

    #[error("malformed tool schema for {name}: {reason}")]
    MalformedToolSchema { name: String, reason: String },
}

/// Transport errors: the provider HTTP call or a transport's read/write loop failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("provider request failed: {0}")]
    Http(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("stdio error: {0}")]
    Stdio(String),
}

/// Adapter errors: a provider response could not be parsed into canonical messages.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unrecognized content block of type {kind} in {provider} response")]
    UnrecognizedBlock { provider: String, kind: String },

    #[error("invalid JSON in tool arguments for {tool_name}: {reason}")]
    InvalidToolArguments { tool_name: String, reason: String },

    #[error("malformed {provider} response: {reason}")]
    MalformedResponse { provider: String, reason: String },
}

/// Tool dispatch errors. Non-fatal: the driver records this string in the emitted
/// `tool_result.error` field and lets the model see it on the next round.
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl ToolError {
    /// Build the exact message the tool dispatcher emits when no resolution path
    /// handles a call (§4.3 step 4).
    pub fn unresolved(tool_name: &str) -> Self {
        ToolError::ExecutionFailed(tool_name.to_string())
    }
}

/// Stream sub-protocol errors (§4.5, §7).
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    #[error("timeout waiting for acknowledgment")]
    AckTimeout,

    #[error("peer ended the stream")]
    StreamEnd,

    #[error("peer reported an error: {0}")]
    PeerError(String),

    #[error("no subscriber for stream_id {0}, frame dropped")]
    NoSubscriber(String),
}

impl StreamError {
    /// Convert a stream delegation failure into a tool error, per §7: stream
    /// delegation errors are treated as tool errors unless they occur during
    /// follow-up solicitation (handled separately by the driver).
    pub fn into_tool_error(self) -> ToolError {
        ToolError::Other(self.to_string())
    }
}
