//! Drives one conversation over stdio using whichever provider's API key is
//! set in the environment, picked in the same order the teacher's own
//! `interactive_streaming_session` example tries its clients.
//!
//! Run from the crate root:
//!
//!   OPENAI_API_KEY=sk-... cargo run --example stdio_session -- gpt-4o "what's 2+2?"
//!   ANTHROPIC_API_KEY=sk-ant-... cargo run --example stdio_session -- claude-sonnet-4 "hi"
//!
//! History-sendable messages piped in on stdin before a
//! `stream_init_events_finished` line are loaded as prior turns; every event
//! the engine emits is written back out as newline-delimited JSON.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::cloudllm::http_client_pool::get_or_create_client;
use convoy_core::driver::ProviderHttpClient;
use convoy_core::error::TransportError;
use convoy_core::provider::ProviderShape;
use convoy_core::transport::stdio::run_stdio;
use convoy_core::{Message, Request};
use serde_json::Value;

struct ReqwestProviderClient;

#[async_trait]
impl ProviderHttpClient for ReqwestProviderClient {
    async fn call(&self, shape: ProviderShape, model: &str, base_url: &str, token: &str, body: Value) -> Result<Value, TransportError> {
        let client = get_or_create_client(base_url);
        let response = match shape {
            ProviderShape::OpenAI => client
                .post(format!("{base_url}/chat/completions"))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await,
            ProviderShape::Anthropic => client
                .post(format!("{base_url}/messages"))
                .header("x-api-key", token)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await,
            ProviderShape::Gemini => client
                .post(format!("{base_url}/models/{model}:generateContent?key={token}"))
                .json(&body)
                .send()
                .await,
        };
        let response = response.map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Http(format!("{status}: {body}")));
        }
        Ok(body)
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let model = args.next().unwrap_or_else(|| "gpt-4o".to_string());
    let user_message = args.next().unwrap_or_else(|| "Say hello in one sentence.".to_string());

    let event_callback: convoy_core::EventCallback = Arc::new(|_msg: &Message| {
        // run_stdio already forwards every event to stdout as NDJSON; nothing
        // extra to do here, but a caller embedding the engine directly (not
        // over stdio) would render/log `_msg` at this point instead.
    });

    let request = Request::new(model, user_message, event_callback);
    let http_client: Arc<dyn ProviderHttpClient> = Arc::new(ReqwestProviderClient);

    match run_stdio(request, http_client).await {
        Ok(response) => {
            log::info!(
                "conversation finished: {} round(s), {} total tokens, ${} total cost",
                response.rounds_used,
                response.total_usage.total,
                response.total_cost.total,
            );
        }
        Err(e) => {
            eprintln!("conversation failed: {e}");
            std::process::exit(1);
        }
    }
}
