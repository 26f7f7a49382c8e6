//! Token accounting and decimal cost arithmetic (§3, §9).
//!
//! `TokenUsage` is a plain additive struct. `TokenCost` mirrors its shape with
//! decimal-string USD values; floating point is never used for money so that totals
//! stay bit-identical across runs (§9 "Cost arithmetic"). Decimal values are backed
//! by `rust_decimal`, which carries 96 bits of integer precision with an explicit
//! scale — comfortably past the `>= 10^20` the design calls for on top of the
//! arithmetic actually encountered (USD amounts never get close to that range; the
//! requirement is about avoiding silent precision loss, not about overflow).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::str::FromStr;

/// Componentwise-additive token counts for one round or one whole conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    #[serde(default)]
    pub input_breakdown: InputBreakdown,
    #[serde(default)]
    pub output_breakdown: OutputBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBreakdown {
    pub cache_write: u64,
    pub cache_read: u64,
    pub non_cache_read: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBreakdown {
    pub cache_output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        TokenUsage {
            input,
            output,
            total: input + output,
            input_breakdown: InputBreakdown::default(),
            output_breakdown: OutputBreakdown::default(),
        }
    }

    /// Sum all fields componentwise (§3: "Additive: a.Add(b) sums all fields").
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input: self.input + other.input,
            output: self.output + other.output,
            total: self.total + other.total,
            input_breakdown: InputBreakdown {
                cache_write: self.input_breakdown.cache_write + other.input_breakdown.cache_write,
                cache_read: self.input_breakdown.cache_read + other.input_breakdown.cache_read,
                non_cache_read: self.input_breakdown.non_cache_read + other.input_breakdown.non_cache_read,
            },
            output_breakdown: OutputBreakdown {
                cache_output: self.output_breakdown.cache_output + other.output_breakdown.cache_output,
            },
        }
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;
    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage::add(&self, &rhs)
    }
}

/// Decimal-string USD cost, mirroring [`TokenUsage`]'s shape (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCost {
    pub input: String,
    pub output: String,
    pub total: String,
}

impl TokenCost {
    pub fn zero() -> Self {
        TokenCost {
            input: "0".to_string(),
            output: "0".to_string(),
            total: "0".to_string(),
        }
    }

    pub fn new(input: Decimal, output: Decimal) -> Self {
        let total = input + output;
        TokenCost {
            input: render_usd(input),
            output: render_usd(output),
            total: render_usd(total),
        }
    }

    /// Fixed-point decimal addition, associative and commutative for non-negative
    /// string inputs (§8 universal invariant). Used to fold a running total across
    /// rounds without ever touching a float.
    pub fn add(&self, other: &TokenCost) -> TokenCost {
        TokenCost {
            input: add_decimals(&self.input, &other.input),
            output: add_decimals(&self.output, &other.output),
            total: add_decimals(&self.total, &other.total),
        }
    }
}

/// Parse a decimal string, treating an empty string as zero and skipping (treating
/// as zero) anything that doesn't parse. Mirrors the Testable Property (§8):
/// `addDecimals("0.1","0.2") == "0.30"`; `"999999.99" + "0.01" == "1000000.00"`.
pub fn add_decimals(a: &str, b: &str) -> String {
    let da = parse_decimal_or_zero(a);
    let db = parse_decimal_or_zero(b);
    render_usd(da + db)
}

fn parse_decimal_or_zero(s: &str) -> Decimal {
    if s.trim().is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO)
}

/// Render a decimal as a USD amount: always at least 2 decimal places, more if the
/// value actually carries finer precision (sub-cent pricing is common for tokens).
fn render_usd(mut d: Decimal) -> String {
    let scale = d.scale().max(2);
    d.rescale(scale);
    d.to_string()
}
