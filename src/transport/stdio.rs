//! Stdio transport (C6, §4.6): operates on `{stdin, stdout}` of the engine
//! process. On startup, consumes history-sendable messages from stdin until
//! `stream_init_events_finished`; thereafter, driver events and delegated
//! tool/follow-up requests are written as newline-delimited JSON to stdout,
//! while the peer's acks and responses arrive on stdin and are demultiplexed
//! by the stream sub-protocol. The process exits when the driver returns.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use crate::driver::{run, ProviderHttpClient, Request, Response};
use crate::error::ConvoyError;
use crate::message::{Message, MsgType};
use crate::stream::{Demultiplexer, StreamPair};
use crate::transport::{forwarding_callback, ChannelSink};

/// Run one Request over stdio to completion (§4.6).
///
/// `request.history` is extended with whatever history-sendable messages
/// arrive before `stream_init_events_finished`; the rest of `request` (model,
/// tools, callbacks, ...) is the caller's responsibility, same as any other
/// direct [`run`] call.
pub async fn run_stdio(mut request: Request, http_client: Arc<dyn ProviderHttpClient>) -> Result<Response, ConvoyError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    consume_init_history(&mut lines, &mut request.history).await;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound_rx.recv().await {
            let Ok(line) = serde_json::to_string(&message) else { continue };
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let demux = Arc::new(Demultiplexer::new());
    let sink = Arc::new(ChannelSink::new(outbound_tx.clone()));
    request.stream_pair = Some(StreamPair::new(sink, demux.clone()));
    request.event_callback = forwarding_callback(request.event_callback.clone(), outbound_tx.clone());

    let reader = tokio::spawn(read_loop(lines, demux.clone()));

    let result = run(request, http_client).await;

    reader.abort();
    demux.close_all();
    drop(outbound_tx);
    let _ = writer.await;
    result
}

/// Read history-sendable messages off `lines` until `stream_init_events_finished`
/// (§4.5 "Initial-events handshake"), pushing each onto `history` in order.
async fn consume_init_history(lines: &mut Lines<BufReader<Stdin>>, history: &mut Vec<Message>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) if msg.msg_type == MsgType::StreamInitEventsFinished => return,
                    Ok(msg) if msg.is_history_sendable() => history.push(msg),
                    Ok(_) => log::debug!("stdio: ignoring non-history frame during init handshake"),
                    Err(e) => log::warn!("stdio: malformed init-history line, dropping: {e}"),
                }
            }
            Ok(None) => return, // stdin closed before the handshake finished: proceed with no history
            Err(e) => {
                log::warn!("stdio: read error during init handshake, proceeding: {e}");
                return;
            }
        }
    }
}

/// After the init handshake, every remaining line is a stream sub-protocol
/// frame (ack, tool/follow-up response, or unrelated telemetry the peer is
/// mirroring back) routed by `stream_id` (§4.5 "Demultiplexer").
async fn read_loop(mut lines: Lines<BufReader<Stdin>>, demux: Arc<Demultiplexer>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(message) => demux.route(message).await,
                    Err(e) => log::warn!("stdio: malformed inbound line, dropping: {e}"),
                }
            }
            Ok(None) => break, // EOF: peer closed stdin
            Err(e) => {
                log::warn!("stdio: read error, ending read loop: {e}");
                break;
            }
        }
    }
}
