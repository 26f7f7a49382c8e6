//! Provider adapters (C2): translate the canonical message/tool model to each
//! provider's wire format and back, confining all three providers' quirks behind
//! one small interface (§9 "Provider polymorphism without inheritance").
//!
//! Each adapter implements [`ProviderAdapter`]: `build_request` turns canonical
//! history + tools into the provider's JSON body, `parse_response` turns the
//! provider's JSON body back into canonical messages plus token usage and a
//! "stopped" flag. The actual HTTP call is a separate concern — see
//! [`crate::driver::ProviderHttpClient`] — so an adapter never owns a socket.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::cost::TokenUsage;
use crate::error::{AdapterError, ConfigError};
use crate::message::{Message, UnifiedTool};
use serde_json::Value;

/// The wire family a model belongs to (§6 "Provider selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderShape {
    OpenAI,
    Anthropic,
    Gemini,
}

impl ProviderShape {
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderShape::OpenAI => "OPENAI",
            ProviderShape::Anthropic => "ANTHROPIC",
            ProviderShape::Gemini => "GEMINI",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderShape::OpenAI => "https://api.openai.com/v1",
            ProviderShape::Anthropic => "https://api.anthropic.com/v1",
            ProviderShape::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

/// Static model-name → (shape, pricing) table (§6). Matches by exact name or, for
/// unlisted names, by recognizable provider-family prefix so new dated model
/// snapshots don't require a code change to at least select the right shape.
pub fn resolve_shape(model: &str) -> Result<ProviderShape, ConfigError> {
    let m = model.to_lowercase();
    if m.starts_with("gpt-") || m.starts_with("o1") || m.starts_with("o3") || m.starts_with("chatgpt") {
        return Ok(ProviderShape::OpenAI);
    }
    if m.starts_with("claude-") {
        return Ok(ProviderShape::Anthropic);
    }
    if m.starts_with("gemini-") {
        return Ok(ProviderShape::Gemini);
    }
    Err(ConfigError::UnknownModel { model: model.to_string() })
}

/// Per-model USD-per-1M-token pricing entry. Anthropic carries distinct
/// cache_write/cache_read/non_cache_read rates; OpenAI/Gemini price aggregate
/// input at `input_per_mtok` and discount cached reads at `cache_read_per_mtok`
/// (§4.2 "Pricing", §9 open question d: computed separately, summed once).
#[derive(Debug, Clone, Copy)]
pub struct PriceTable {
    pub input_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl PriceTable {
    const ZERO: PriceTable = PriceTable {
        input_per_mtok: 0.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };
}

/// Look up a price table for `model`. Unknown models price at zero rather than
/// failing the request — cost accounting is best-effort telemetry, not a billing
/// source of truth.
pub fn price_table(model: &str) -> PriceTable {
    let m = model.to_lowercase();
    match m.as_str() {
        "gpt-4o" => PriceTable { input_per_mtok: 2.50, cache_write_per_mtok: 0.0, cache_read_per_mtok: 1.25, output_per_mtok: 10.00 },
        "gpt-4o-mini" => PriceTable { input_per_mtok: 0.15, cache_write_per_mtok: 0.0, cache_read_per_mtok: 0.075, output_per_mtok: 0.60 },
        "claude-opus-4-5-20251101" | "claude-opus-4-5" => PriceTable { input_per_mtok: 15.00, cache_write_per_mtok: 18.75, cache_read_per_mtok: 1.50, output_per_mtok: 75.00 },
        "claude-sonnet-4-20250514" | "claude-sonnet-4" => PriceTable { input_per_mtok: 3.00, cache_write_per_mtok: 3.75, cache_read_per_mtok: 0.30, output_per_mtok: 15.00 },
        "claude-haiku-4-5-20241022" | "claude-haiku-4-5" => PriceTable { input_per_mtok: 0.80, cache_write_per_mtok: 1.00, cache_read_per_mtok: 0.08, output_per_mtok: 4.00 },
        "gemini-1.5-pro" | "gemini-2.0-pro" => PriceTable { input_per_mtok: 1.25, cache_write_per_mtok: 0.0, cache_read_per_mtok: 0.3125, output_per_mtok: 5.00 },
        "gemini-1.5-flash" | "gemini-2.0-flash" => PriceTable { input_per_mtok: 0.075, cache_write_per_mtok: 0.0, cache_read_per_mtok: 0.01875, output_per_mtok: 0.30 },
        _ => PriceTable::ZERO,
    }
}

/// Outcome of parsing one provider response (§4.2 "Provider response → canonical
/// messages"): the canonical messages it produced (text + tool_call entries, in
/// order), the usage it billed, and whether the provider signaled natural end of
/// turn with no unexecuted tool calls remaining.
pub struct ParsedResponse {
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    pub stopped: bool,
}

/// The `{buildRequest, parseResponse}` seam every provider adapter implements
/// (§9). Adapters never perform I/O themselves — `build_request` returns a JSON
/// body for the caller to POST, `parse_response` consumes the JSON body the
/// caller got back.
pub trait ProviderAdapter {
    /// Translate canonical history + tool schemas into this provider's request
    /// body. `system_prompt`, if set, is merged per-provider (§4.2). When
    /// `cache_enabled` and this is the Anthropic adapter, ephemeral cache markers
    /// are attached to tools/system/last message block (§4.2 "Cache-hint marking").
    fn build_request(
        &self,
        model: &str,
        history: &[Message],
        tools: &[UnifiedTool],
        system_prompt: Option<&str>,
        cache_enabled: bool,
    ) -> Value;

    /// Translate a provider response body into canonical messages + usage +
    /// stop flag. Unrecognized content-block types are a hard [`AdapterError`]
    /// (§7 "Adapter errors").
    fn parse_response(&self, body: &Value) -> Result<ParsedResponse, AdapterError>;

    fn shape(&self) -> ProviderShape;
}

/// Compute USD cost for one [`TokenUsage`] against `model`'s price table (§4.4
/// "Post-flight", §4.2 "Pricing"). Cached and non-cached input tokens are priced
/// separately and summed exactly once, per §9 open question (d).
pub fn cost_for_usage(model: &str, usage: &TokenUsage) -> crate::cost::TokenCost {
    use rust_decimal::Decimal;

    let table = price_table(model);
    let mtok = Decimal::from(1_000_000u64);
    let rate = |per_mtok: f64| Decimal::try_from(per_mtok).unwrap_or(Decimal::ZERO);

    let cache_write = Decimal::from(usage.input_breakdown.cache_write) * rate(table.cache_write_per_mtok) / mtok;
    let cache_read = Decimal::from(usage.input_breakdown.cache_read) * rate(table.cache_read_per_mtok) / mtok;
    let non_cache_read = Decimal::from(usage.input_breakdown.non_cache_read) * rate(table.input_per_mtok) / mtok;

    // Non-Anthropic shapes don't populate cache_write; non_cache_read already
    // excludes cache_read (§4.2 token usage extraction), so this never double-counts.
    let input_cost = cache_write + cache_read + non_cache_read;
    let output_cost = Decimal::from(usage.output) * rate(table.output_per_mtok) / mtok;

    crate::cost::TokenCost::new(input_cost, output_cost)
}
