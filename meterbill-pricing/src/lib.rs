//! The pricing engine: a pure function from `(rate plan, usage count, today)`
//! to a priced breakdown. No I/O, no fallible return — malformed
//! sub-structures default to zero and are skipped rather than erroring,
//! per the contract in `spec.md` §4.5.

mod pipeline;

use chrono::NaiveDate;
use meterbill_types::RatePlan;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One entry of the priced breakdown, in pipeline order. Zero-amount entries
/// (freemium reduction, minimum-usage uplift) are retained for operator
/// transparency, not filtered out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakdownEntry {
    pub label: String,
    pub calculation: String,
    pub amount: Decimal,
}

impl BreakdownEntry {
    fn new(label: impl Into<String>, calculation: impl Into<String>, amount: Decimal) -> Self {
        Self {
            label: label.into(),
            calculation: calculation.into(),
            amount,
        }
    }
}

/// Result of pricing a single rate plan against a usage count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceResult {
    pub model_type: String,
    pub event_count: u64,
    pub breakdown: Vec<BreakdownEntry>,
    pub total: Decimal,
}

/// Prices `actual_usage` billable units against `plan`, as of `today`
/// (`today` only gates discount validity windows — nothing else about the
/// computation depends on wall-clock time).
///
/// Given the same inputs, this function returns a bit-equal result on every
/// invocation: no randomness, no hidden state.
pub fn price(plan: &RatePlan, actual_usage: u64, today: NaiveDate) -> PriceResult {
    pipeline::run(plan, actual_usage, today)
}
