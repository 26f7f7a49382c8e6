//! Transports (C6/C7): carry one conversation [`Request`][crate::driver::Request]
//! over stdio or a WebSocket connection. Both transports wire a [`FrameSink`]
//! and a shared [`Demultiplexer`] into a [`StreamPair`] and hand the result to
//! [`crate::driver::run`] — no conversation logic lives here, only framing.

pub mod stdio;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::message::Message;

/// A [`FrameSink`] that writes every frame onto an unbounded channel instead
/// of directly onto the wire. Both transports drain the other end from one
/// dedicated writer task, giving the single-writer discipline the design
/// calls for (§4.7 "outbound frames are serialized via a single writer task")
/// without duplicating the plumbing in each transport.
pub(crate) struct ChannelSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        ChannelSink { tx }
    }
}

#[async_trait]
impl crate::stream::FrameSink for ChannelSink {
    async fn send_frame(&self, message: Message) -> Result<(), StreamError> {
        self.tx.send(message).map_err(|_| StreamError::StreamEnd)
    }
}

/// Wrap a caller-supplied [`EventCallback`][crate::driver::EventCallback] so
/// every emitted event is *also* forwarded onto `tx`, preserving emission
/// order (the forward happens synchronously in the same call the driver
/// makes — §4.4 "Event emission").
pub(crate) fn forwarding_callback(
    inner: crate::driver::EventCallback,
    tx: mpsc::UnboundedSender<Message>,
) -> crate::driver::EventCallback {
    std::sync::Arc::new(move |msg: &Message| {
        inner(msg);
        let _ = tx.send(msg.clone());
    })
}
