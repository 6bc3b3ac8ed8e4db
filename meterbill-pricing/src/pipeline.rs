use crate::BreakdownEntry;
use crate::PriceResult;
use chrono::NaiveDate;
use meterbill_types::{RatePlan, Tier};
use rust_decimal::{Decimal, RoundingStrategy};

fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

struct Accumulator {
    billed_usage: u64,
    total: Decimal,
    breakdown: Vec<BreakdownEntry>,
}

pub(crate) fn run(plan: &RatePlan, actual_usage: u64, today: NaiveDate) -> PriceResult {
    let mut acc = Accumulator {
        billed_usage: actual_usage,
        total: Decimal::ZERO,
        breakdown: Vec::new(),
    };

    apply_freemium(plan, actual_usage, &mut acc);
    apply_minimum_usage_floor(plan, &mut acc);

    if let Some(flat_fee) = &plan.flat_fee {
        apply_flat_fee(flat_fee, &mut acc);
    }
    for usage_pricing in &plan.usage_pricings {
        apply_usage_pricing(usage_pricing, &mut acc);
    }
    for tiered in &plan.tiered_pricings {
        apply_tiered_pricing(tiered, &mut acc);
    }
    for volume in &plan.volume_pricings {
        apply_volume_pricing(volume, &mut acc);
    }
    for stair_step in &plan.stair_step_pricings {
        apply_stair_step_pricing(stair_step, &mut acc);
    }

    apply_setup_fees(plan, &mut acc);
    apply_discounts(plan, today, &mut acc);
    apply_minimum_charge_floor(plan, &mut acc);

    PriceResult {
        model_type: plan.billing_frequency.0.clone(),
        event_count: actual_usage,
        breakdown: acc.breakdown,
        total: round2(acc.total),
    }
}

/// Step 1: freemium reduction.
fn apply_freemium(plan: &RatePlan, actual_usage: u64, acc: &mut Accumulator) {
    let free_units: u64 = plan.freemiums.iter().map(|f| f.free_units).sum();
    if free_units == 0 {
        return;
    }
    let applied = free_units.min(actual_usage);
    acc.billed_usage = actual_usage - applied;
    acc.breakdown.push(BreakdownEntry::new(
        "Freemium Reduction",
        format!("{applied} units waived of {free_units} free"),
        Decimal::ZERO,
    ));
}

/// Step 2: minimum-usage floor.
fn apply_minimum_usage_floor(plan: &RatePlan, acc: &mut Accumulator) {
    let min_usage = plan
        .minimum_commitments
        .iter()
        .filter_map(|m| m.minimum_usage)
        .max()
        .unwrap_or(0);
    if acc.billed_usage < min_usage {
        acc.breakdown.push(BreakdownEntry::new(
            "Minimum Usage Uplift",
            format!("{} -> {min_usage} units (minimum usage commitment)", acc.billed_usage),
            Decimal::ZERO,
        ));
        acc.billed_usage = min_usage;
    }
}

fn apply_flat_fee(flat_fee: &meterbill_types::FlatFee, acc: &mut Accumulator) {
    acc.total += flat_fee.amount;
    acc.breakdown.push(BreakdownEntry::new(
        "Flat Fee",
        format!("{:.2}", flat_fee.amount),
        flat_fee.amount,
    ));

    let over_units = acc.billed_usage.saturating_sub(flat_fee.included_units);
    if over_units > 0 {
        if let Some(rate) = flat_fee.overage_rate {
            if rate > Decimal::ZERO {
                let amount = Decimal::from(over_units) * rate;
                acc.total += amount;
                acc.breakdown.push(BreakdownEntry::new(
                    "Overage Charges",
                    format!("{over_units} * {rate} = {amount:.2}"),
                    amount,
                ));
            }
        }
    }
}

fn apply_usage_pricing(usage_pricing: &meterbill_types::UsagePricing, acc: &mut Accumulator) {
    let amount = Decimal::from(acc.billed_usage) * usage_pricing.price_per_unit;
    acc.total += amount;
    acc.breakdown.push(BreakdownEntry::new(
        "Usage Charges",
        format!(
            "{} * {} = {amount:.2}",
            acc.billed_usage, usage_pricing.price_per_unit
        ),
        amount,
    ));
}

fn sorted_tiers(tiers: &[Tier]) -> Vec<&Tier> {
    let mut sorted: Vec<&Tier> = tiers.iter().collect();
    sorted.sort_by_key(|t| t.range.min_units);
    sorted
}

/// Step 3, graduated tiered pricing. Walks tiers in order, consuming each
/// tier's capacity before moving to the next; any units left over after the
/// last tier are overage. When `overage_unit_rate` is absent or non-positive
/// this falls back to the last tier's per-unit rate (see DESIGN.md for the
/// rationale — the spec leaves this an open question and asks for one
/// normative choice).
fn apply_tiered_pricing(tiered: &meterbill_types::TieredPricing, acc: &mut Accumulator) {
    let tiers = sorted_tiers(&tiered.tiers);
    if tiers.is_empty() {
        return;
    }
    let mut remaining = acc.billed_usage;
    let mut consumed: u64 = 0;
    let mut subtotal = Decimal::ZERO;
    let mut consumed_any = false;
    for tier in &tiers {
        if remaining == 0 {
            break;
        }
        // A tier only applies once usage has actually reached its floor; a
        // tier starting past the current position (the first tier's floor
        // above the first billable unit, or a gap between tiers) is left
        // unbilled here and falls through to the overage branch below
        // instead. `consumed + 1` is the next unit up for billing under the
        // inclusive, 1-indexed ranges `UnitRange::width` assumes.
        if tier.range.min_units > consumed + 1 {
            continue;
        }
        let capacity = tier.range.width();
        let take = capacity.map_or(remaining, |c| c.min(remaining));
        if take == 0 {
            continue;
        }
        subtotal += Decimal::from(take) * tier.price_per_unit;
        remaining -= take;
        consumed += take;
        consumed_any = true;
    }
    if remaining > 0 {
        let rate = match tiered.overage_unit_rate {
            Some(rate) if rate > Decimal::ZERO => rate,
            _ => tiers.last().unwrap().price_per_unit,
        };
        subtotal += Decimal::from(remaining) * rate;
        consumed_any = true;
    }
    if consumed_any {
        acc.total += subtotal;
        acc.breakdown.push(BreakdownEntry::new(
            "Tiered Usage Charges",
            format!("graduated over {} units = {subtotal:.2}", acc.billed_usage),
            subtotal,
        ));
    }
}

/// Step 3, volume (all-or-nothing) pricing: the entire usage is billed at a
/// single matching tier's rate.
fn apply_volume_pricing(volume: &meterbill_types::VolumePricing, acc: &mut Accumulator) {
    let tiers = sorted_tiers(&volume.tiers);
    if tiers.is_empty() {
        return;
    }
    let usage = acc.billed_usage;
    let first = tiers.first().unwrap();
    let last = tiers.last().unwrap();

    let amount = if usage < first.range.min_units {
        Decimal::ZERO
    } else if let Some(tier) = tiers.iter().find(|t| t.range.contains(usage)) {
        Decimal::from(usage) * tier.price_per_unit
    } else {
        // usage exceeds every tier's upper bound
        match volume.overage_unit_rate {
            Some(rate) if rate > Decimal::ZERO => Decimal::from(usage) * rate,
            _ => Decimal::from(usage) * last.price_per_unit,
        }
    };

    if amount != Decimal::ZERO || usage >= first.range.min_units {
        acc.total += amount;
        acc.breakdown.push(BreakdownEntry::new(
            "Volume Usage Charges",
            format!("{usage} units = {amount:.2}"),
            amount,
        ));
    }
}

/// Step 3, stair-step (flat-per-bucket) pricing.
fn apply_stair_step_pricing(stair_step: &meterbill_types::StairStepPricing, acc: &mut Accumulator) {
    if stair_step.steps.is_empty() {
        return;
    }
    let mut steps: Vec<&meterbill_types::StairStep> = stair_step.steps.iter().collect();
    steps.sort_by_key(|s| s.range.min_units);
    let usage = acc.billed_usage;
    let first = steps.first().unwrap();
    let last = steps.last().unwrap();

    let amount = if usage < first.range.min_units {
        Decimal::ZERO
    } else if let Some(step) = steps.iter().find(|s| s.range.contains(usage)) {
        step.flat_charge
    } else {
        match stair_step.overage_unit_rate {
            Some(rate) if rate > Decimal::ZERO => Decimal::from(usage) * rate,
            _ => last.flat_charge,
        }
    };

    if usage >= first.range.min_units {
        acc.total += amount;
        acc.breakdown.push(BreakdownEntry::new(
            "Stair-Step Charges",
            format!("step for {usage} units = {amount:.2}"),
            amount,
        ));
    }
}

/// Step 4: setup fees.
fn apply_setup_fees(plan: &RatePlan, acc: &mut Accumulator) {
    let total_setup: Decimal = plan.setup_fees.iter().map(|f| f.amount).sum();
    if total_setup != Decimal::ZERO {
        acc.total += total_setup;
        acc.breakdown.push(BreakdownEntry::new(
            "Setup Fee",
            format!("{total_setup:.2}"),
            total_setup,
        ));
    }
}

/// Step 5: discounts, applied to the current running total in plan order.
fn apply_discounts(plan: &RatePlan, today: NaiveDate, acc: &mut Accumulator) {
    for discount in &plan.discounts {
        if !discount.active_on(today) {
            continue;
        }
        let raw_amount = match discount.effective_kind() {
            Some(meterbill_types::DiscountKind::Percentage) => {
                let pct = discount.percentage.unwrap_or(Decimal::ZERO);
                round2(acc.total * pct / Decimal::from(100))
            }
            Some(meterbill_types::DiscountKind::Flat) => discount.flat_amount.unwrap_or(Decimal::ZERO),
            None => continue,
        };
        let clipped = raw_amount.min(acc.total).max(Decimal::ZERO);
        if clipped == Decimal::ZERO {
            continue;
        }
        acc.total -= clipped;
        acc.breakdown.push(BreakdownEntry::new(
            "Discount",
            format!("-{clipped:.2}"),
            -clipped,
        ));
    }
}

/// Step 6: minimum-charge floor.
fn apply_minimum_charge_floor(plan: &RatePlan, acc: &mut Accumulator) {
    let min_charge = plan
        .minimum_commitments
        .iter()
        .filter_map(|m| m.minimum_amount)
        .fold(Decimal::ZERO, |a, b| a.max(b));
    if min_charge > Decimal::ZERO && acc.total > Decimal::ZERO && acc.total < min_charge {
        let uplift = min_charge - acc.total;
        acc.total = min_charge;
        acc.breakdown.push(BreakdownEntry::new(
            "Minimum Charge Uplift",
            format!("+{uplift:.2} to reach minimum charge {min_charge:.2}"),
            uplift,
        ));
    }
}
