//! Stream sub-protocol (C5): the reversible request/ACK/response framing used
//! by both the stdio and WebSocket transports to let the driver pause
//! mid-conversation and delegate work to a connected peer (§4.5).
//!
//! A [`StreamPair`] bundles an outbound sink (what a transport uses to write
//! frames to its peer) with a [`Demultiplexer`] that routes *inbound* frames
//! back to whichever in-flight delegation is waiting on that `stream_id`. Both
//! halves of the protocol — `stream_request_tool`/`stream_request_user_msg` —
//! share the same ACK-then-terminal-frame shape, so they're implemented once
//! here and reused by both transports.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::StreamError;
use crate::message::{Message, MsgType, Role, ToolResult};

/// ACK deadline (§4.5, §5 Timeouts): the peer must acknowledge a request within
/// one second or the engine treats it as a timeout and moves on.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Depth of each per-stream-ID inbound channel (§4.5 "Demultiplexer", §9
/// "Stream demux"): generous for typical usage, small enough that a forgetful
/// subscriber can't accumulate unbounded memory.
const CHANNEL_DEPTH: usize = 10;

/// Whatever a transport uses to actually write a frame to its peer (stdout
/// line, WebSocket text frame, ...). Kept minimal and transport-agnostic so
/// C5 never depends on axum or stdio directly.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, message: Message) -> Result<(), StreamError>;
}

/// Single reader's ID-to-channel map (§4.5 "Demultiplexer", §5 "Shared
/// resources"): subscribe/unsubscribe/route are the only operations, and all
/// of them are safe to call concurrently — `DashMap` gives us the mutex
/// discipline the design calls for without a manual lock.
#[derive(Default)]
pub struct Demultiplexer {
    channels: DashMap<String, mpsc::Sender<Message>>,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Demultiplexer { channels: DashMap::new() }
    }

    /// Create a fresh buffered channel for `stream_id`, replacing a transport's
    /// "first subscribe creates it" step (§3 "Ownership & lifecycle").
    pub fn subscribe(&self, stream_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.channels.insert(stream_id.to_string(), tx);
        rx
    }

    /// Close and remove the channel for `stream_id`; the driver calls this at
    /// request end regardless of how the delegation concluded.
    pub fn unsubscribe(&self, stream_id: &str) {
        self.channels.remove(stream_id);
    }

    /// Route one inbound frame read off the transport to its subscriber.
    /// Frames with no subscriber are dropped, never blocked on (§4.5, §9):
    /// they're either concurrent telemetry the peer is mirroring, or stale.
    pub async fn route(&self, message: Message) {
        let stream_id = match &message.stream_id {
            Some(id) => id.clone(),
            None => return,
        };
        let sender = self.channels.get(&stream_id).map(|e| e.value().clone());
        match sender {
            Some(tx) => {
                if tx.try_send(message).is_err() {
                    log::warn!("stream_id {stream_id}: subscriber channel full or gone, dropping frame");
                }
            }
            None => log::debug!("stream_id {stream_id}: no subscriber, dropping frame"),
        }
    }

    pub fn close_all(&self) {
        self.channels.clear();
    }
}

/// Couples an outbound [`FrameSink`] with a shared [`Demultiplexer`] so the
/// driver can delegate tool execution and follow-up solicitation without
/// knowing whether it's talking to stdio or a WebSocket (§4.4 step 5, §4.5).
#[derive(Clone)]
pub struct StreamPair {
    sink: Arc<dyn FrameSink>,
    demux: Arc<Demultiplexer>,
}

impl StreamPair {
    pub fn new(sink: Arc<dyn FrameSink>, demux: Arc<Demultiplexer>) -> Self {
        StreamPair { sink, demux }
    }

    pub fn demultiplexer(&self) -> &Arc<Demultiplexer> {
        &self.demux
    }

    fn fresh_stream_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Wait up to [`ACK_TIMEOUT`] for a `stream_handle_ack` on `rx`, then
    /// return it consumed (so the caller's next `recv` sees the frame after
    /// the ack) or a timeout error (§4.5, §8 scenario 7).
    async fn await_ack(rx: &mut mpsc::Receiver<Message>, stream_id: &str) -> Result<(), StreamError> {
        match timeout(ACK_TIMEOUT, rx.recv()).await {
            Ok(Some(msg)) if msg.msg_type == MsgType::StreamHandleAck => Ok(()),
            Ok(Some(_)) => {
                // An early terminal frame before ACK is treated as a missing
                // ACK (§5 "Ordering": the peer MUST ack before the terminal frame).
                log::warn!("stream_id {stream_id}: terminal frame arrived before ACK, treating as timeout");
                Err(StreamError::AckTimeout)
            }
            Ok(None) => Err(StreamError::AckTimeout),
            Err(_) => Err(StreamError::AckTimeout),
        }
    }

    /// Delegate one tool call to the peer (§4.5 `stream_request_tool`).
    /// Blocks on the ACK for at most one second, then waits unbounded (the
    /// caller's own context/timeout governs) for the `stream_response_tool`.
    pub async fn request_tool(
        &self,
        tool_name: &str,
        args_json: &str,
        default_working_dir: Option<&str>,
    ) -> Result<ToolResult, StreamError> {
        let stream_id = Self::fresh_stream_id();
        let mut rx = self.demux.subscribe(&stream_id);

        let mut request = Message::msg(Role::System, args_json.to_string());
        request.msg_type = MsgType::StreamRequestTool;
        request.tool_name = Some(tool_name.to_string());
        request.stream_id = Some(stream_id.clone());
        if let Some(dir) = default_working_dir {
            request
                .metadata
                .insert("stream_request_tool".to_string(), serde_json::json!({ "default_working_dir": dir }));
        }

        let result = self.run_request(&mut rx, &stream_id, request, MsgType::StreamResponseTool).await;
        self.demux.unsubscribe(&stream_id);
        result.map(|msg| {
            let ok = msg.metadata.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
            if ok {
                let content: serde_json::Value = serde_json::from_str(&msg.content).unwrap_or(serde_json::Value::String(msg.content.clone()));
                ToolResult::ok(content)
            } else {
                ToolResult::failure(msg.content)
            }
        })
    }

    /// Solicit a follow-up user message from the peer (§4.4 step 5, §4.5
    /// `stream_request_user_msg`). Returns `Ok(Some(text))` for a new user
    /// turn, `Ok(None)` if the peer sent `stream_end` ("nothing more").
    pub async fn request_user_msg(&self) -> Result<Option<String>, StreamError> {
        let stream_id = Self::fresh_stream_id();
        let mut rx = self.demux.subscribe(&stream_id);

        let mut request = Message::msg(Role::System, String::new());
        request.msg_type = MsgType::StreamRequestUserMsg;
        request.stream_id = Some(stream_id.clone());

        self.sink.send_frame(request).await?;
        StreamPair::await_ack(&mut rx, &stream_id).await?;

        let terminal = rx.recv().await;
        self.demux.unsubscribe(&stream_id);
        match terminal {
            Some(msg) if msg.msg_type == MsgType::Msg && msg.role == Role::User => Ok(Some(msg.content)),
            Some(msg) if msg.msg_type == MsgType::StreamEnd => Ok(None),
            Some(msg) if msg.msg_type == MsgType::Error => Err(StreamError::PeerError(msg.content)),
            _ => Err(StreamError::StreamEnd),
        }
    }

    async fn run_request(
        &self,
        rx: &mut mpsc::Receiver<Message>,
        stream_id: &str,
        request: Message,
        expected_terminal: MsgType,
    ) -> Result<Message, StreamError> {
        self.sink.send_frame(request).await?;
        StreamPair::await_ack(rx, stream_id).await?;

        match rx.recv().await {
            Some(msg) if msg.msg_type == expected_terminal => Ok(msg),
            Some(msg) if msg.msg_type == MsgType::StreamEnd => Err(StreamError::StreamEnd),
            Some(msg) if msg.msg_type == MsgType::Error => Err(StreamError::PeerError(msg.content)),
            Some(_) => Err(StreamError::StreamEnd),
            None => Err(StreamError::StreamEnd),
        }
    }
}
