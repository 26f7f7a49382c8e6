//! WebSocket transport (C7, §4.7): exposes `GET /stream?wait_for_stream_events=true`,
//! one connection per conversation. Route-building mirrors the crate's other
//! axum-based server adapter — shared state `Arc::clone`d into the route
//! closure, `TcpListener::bind` + `axum::serve` to run it.
//!
//! Connection lifecycle: upgrade; read `stream_init_request` (the whole
//! Request, in-band, as JSON) then history frames then
//! `stream_init_events_finished` (30s handshake timeout); start the driver;
//! relay every subsequent event on the socket; ping every 10 seconds. A
//! `stream_end` frame from the engine side is the normal way this ends, after
//! which the socket closes with code 1000.

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::driver::{run, ProviderHttpClient, Request};
use crate::error::{ConfigError, TransportError};
use crate::message::{Message, MsgType};
use crate::stream::{Demultiplexer, StreamPair};
use crate::transport::{forwarding_callback, ChannelSink};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Everything one running server needs: where to bind, the shared pieces
/// every connection reuses (callbacks, MCP client, built-ins — via
/// `base_request`), and the provider HTTP client. `base_request.model` and
/// `.user_message` are placeholders; each connection overwrites them from its
/// own in-band `stream_init_request` (§3 "A Request is single-use").
#[derive(Clone)]
pub struct WebSocketServerConfig {
    pub addr: SocketAddr,
    pub base_request: Request,
    pub http_client: Arc<dyn ProviderHttpClient>,
}

struct AppState {
    base_request: Request,
    http_client: Arc<dyn ProviderHttpClient>,
}

/// Bind and serve `/stream` until the process is killed.
pub async fn serve(config: WebSocketServerConfig) -> Result<(), TransportError> {
    let state = Arc::new(AppState { base_request: config.base_request, http_client: config.http_client });
    let app = Router::new().route("/stream", get(upgrade_handler)).with_state(state);

    let listener = TcpListener::bind(config.addr).await.map_err(|e| TransportError::WebSocket(e.to_string()))?;
    axum::serve(listener, app.into_make_service()).await.map_err(|e| TransportError::WebSocket(e.to_string()))?;
    Ok(())
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// In-band Request delivery (§4.5 "Initial-events handshake"): the fields a
/// peer may set over the wire. Everything else on the executed [`Request`]
/// (callbacks, MCP client, built-ins, cancellation) comes from the server's
/// own `base_request` and is never peer-controlled.
#[derive(serde::Deserialize)]
struct WireRequest {
    model: String,
    user_message: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    tools: Vec<serde_json::Value>,
    #[serde(default)]
    builtin_tool_names: Vec<String>,
    #[serde(default)]
    no_cache: bool,
    #[serde(default = "default_max_rounds")]
    max_rounds: u32,
    #[serde(default)]
    default_workspace_root: Option<String>,
}

fn default_max_rounds() -> u32 {
    1
}

fn apply_wire_request(mut request: Request, wire: WireRequest) -> Result<Request, ConfigError> {
    request.model = wire.model;
    request.user_message = wire.user_message;
    if wire.token.is_some() {
        request.token = wire.token;
    }
    if wire.base_url.is_some() {
        request.base_url = wire.base_url;
    }
    if wire.system_prompt.is_some() {
        request.system_prompt = wire.system_prompt;
    }
    for value in &wire.tools {
        request.tools.push(crate::tool_schema::tool_from_value(value, "<websocket stream_init_request>")?);
    }
    request.builtin_tool_names.extend(wire.builtin_tool_names);
    request.no_cache = wire.no_cache;
    request.max_rounds = wire.max_rounds;
    if wire.default_workspace_root.is_some() {
        request.default_workspace_root = wire.default_workspace_root;
    }
    Ok(request)
}

/// Read frames off `ws_stream` until the handshake completes or times out:
/// first a `stream_init_request` carrying the Request as JSON, then zero or
/// more history-sendable messages, then `stream_init_events_finished`.
async fn read_handshake(
    ws_stream: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
) -> Result<(WireRequest, Vec<Message>), TransportError> {
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut wire_request = None;
        let mut history = Vec::new();

        while let Some(frame) = ws_stream.next().await {
            let frame = frame.map_err(|e| TransportError::WebSocket(e.to_string()))?;
            let WsMessage::Text(text) = frame else { continue };
            let message: Message =
                serde_json::from_str(&text).map_err(|e| TransportError::WebSocket(format!("malformed handshake frame: {e}")))?;

            match message.msg_type {
                MsgType::StreamInitRequest if wire_request.is_none() => {
                    wire_request = Some(
                        serde_json::from_str::<WireRequest>(&message.content)
                            .map_err(|e| TransportError::WebSocket(format!("malformed stream_init_request content: {e}")))?,
                    );
                }
                MsgType::StreamInitEventsFinished => {
                    let wire_request = wire_request
                        .ok_or_else(|| TransportError::WebSocket("stream_init_events_finished before stream_init_request".into()))?;
                    return Ok((wire_request, history));
                }
                _ if message.is_history_sendable() => history.push(message),
                _ => log::debug!("websocket: ignoring unexpected frame during handshake"),
            }
        }
        Err(TransportError::WebSocket("connection closed during handshake".into()))
    })
    .await
    .map_err(|_| TransportError::WebSocket("handshake timed out".into()))?
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (ws_sink, mut ws_stream) = socket.split();

    let (wire_request, history) = match read_handshake(&mut ws_stream).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("websocket: handshake failed: {e}");
            return;
        }
    };

    let mut request = match apply_wire_request(state.base_request.clone(), wire_request) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("websocket: rejecting connection, malformed in-band request: {e}");
            return;
        }
    };
    request.history = history;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Single writer owns the socket exclusively (§4.7): driver events, stream
    // delegation frames, and the periodic ping all funnel through here.
    let writer = tokio::spawn(async move {
        let mut ws_sink = ws_sink;
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if ws_sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                received = outbound_rx.recv() => match received {
                    Some(message) => {
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_sink
                            .send(WsMessage::Close(Some(CloseFrame { code: 1000, reason: "".into() })))
                            .await;
                        break;
                    }
                },
            }
        }
    });

    let demux = Arc::new(Demultiplexer::new());
    let sink = Arc::new(ChannelSink::new(outbound_tx.clone()));
    request.stream_pair = Some(StreamPair::new(sink, demux.clone()));
    request.event_callback = forwarding_callback(request.event_callback.clone(), outbound_tx.clone());

    let reader = {
        let demux = demux.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                        Ok(message) => demux.route(message).await,
                        Err(e) => log::warn!("websocket: malformed inbound frame, dropping: {e}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(WsMessage::Pong(_)) => {} // liveness only
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("websocket: read error, ending read loop: {e}");
                        break;
                    }
                }
            }
        })
    };

    if let Err(e) = run(request, state.http_client.clone()).await {
        log::warn!("websocket: conversation ended in error: {e}");
        let _ = outbound_tx.send(Message::error(e.to_string()));
    }

    let mut stream_end = Message::msg(crate::message::Role::System, String::new());
    stream_end.msg_type = MsgType::StreamEnd;
    let _ = outbound_tx.send(stream_end);

    reader.abort();
    demux.close_all();
    drop(outbound_tx);
    let _ = writer.await;
}
