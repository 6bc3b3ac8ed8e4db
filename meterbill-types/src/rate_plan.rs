use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A closed interval `[min_units, max_units]`. `max_units = None` denotes
/// `+infinity`. Invariant: `min_units <= max_units` when both are present;
/// callers that construct these from untrusted configuration should not
/// assume the invariant holds (the pricing engine treats a malformed tier
/// defensively, never by panicking — see `meterbill-pricing`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnitRange {
    pub min_units: u64,
    pub max_units: Option<u64>,
}

impl UnitRange {
    pub fn contains(&self, units: u64) -> bool {
        units >= self.min_units && self.max_units.map_or(true, |max| units <= max)
    }

    /// Width of the range in whole units, or `None` if unbounded above.
    /// A malformed range (`max_units < min_units`) is treated as empty
    /// rather than panicking on underflow — the pricing engine never fails
    /// on bad configuration, it just skips it.
    pub fn width(&self) -> Option<u64> {
        self.max_units
            .map(|max| max.checked_sub(self.min_units).map_or(0, |span| span + 1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatFee {
    pub amount: Decimal,
    pub included_units: u64,
    pub overage_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePricing {
    pub price_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub range: UnitRange,
    pub price_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredPricing {
    pub tiers: Vec<Tier>,
    pub overage_unit_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumePricing {
    pub tiers: Vec<Tier>,
    pub overage_unit_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StairStep {
    pub range: UnitRange,
    pub flat_charge: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StairStepPricing {
    pub steps: Vec<StairStep>,
    pub overage_unit_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupFee {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Freemium {
    pub free_units: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimumCommitment {
    pub minimum_usage: Option<u64>,
    pub minimum_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscountKind {
    Percentage,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub kind: Option<DiscountKind>,
    pub percentage: Option<Decimal>,
    pub flat_amount: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Discount {
    /// Resolves `kind` when the source document omitted the label,
    /// inferring from whichever amount field is populated (flat preferred,
    /// per `spec.md` §4.5 step 5).
    pub fn effective_kind(&self) -> Option<DiscountKind> {
        self.kind.or_else(|| {
            if self.flat_amount.is_some() {
                Some(DiscountKind::Flat)
            } else if self.percentage.is_some() {
                Some(DiscountKind::Percentage)
            } else {
                None
            }
        })
    }

    pub fn active_on(&self, today: NaiveDate) -> bool {
        let after_start = self.start_date.map_or(true, |d| today >= d);
        let before_end = self.end_date.map_or(true, |d| today <= d);
        after_start && before_end
    }
}

/// Billing frequency, carried through to the invoice as `model_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingFrequency(pub String);

/// Composite, declarative rate-plan document. Modeled as a flat record with
/// optional pricing-model fields rather than an inheritance hierarchy, per
/// the Design Note in `spec.md` §9 — the pricing engine's pipeline dispatches
/// on presence of each field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePlan {
    pub rate_plan_id: String,
    pub organization_id: uuid::Uuid,
    pub billing_frequency: BillingFrequency,
    pub billable_metric_id: Option<String>,

    pub flat_fee: Option<FlatFee>,
    pub usage_pricings: Vec<UsagePricing>,
    pub tiered_pricings: Vec<TieredPricing>,
    pub volume_pricings: Vec<VolumePricing>,
    pub stair_step_pricings: Vec<StairStepPricing>,

    pub setup_fees: Vec<SetupFee>,
    pub freemiums: Vec<Freemium>,
    pub minimum_commitments: Vec<MinimumCommitment>,
    pub discounts: Vec<Discount>,
}

impl RatePlan {
    pub fn is_empty(&self) -> bool {
        self.flat_fee.is_none()
            && self.usage_pricings.is_empty()
            && self.tiered_pricings.is_empty()
            && self.volume_pricings.is_empty()
            && self.stair_step_pricings.is_empty()
            && self.setup_fees.is_empty()
            && self.freemiums.is_empty()
            && self.minimum_commitments.is_empty()
            && self.discounts.is_empty()
    }
}
