//! C6 — Metering Service. Orchestrates the event-store reader, rate-plan
//! fetcher, subscription fetcher, and pricing engine for a single estimate
//! request. The window contract `[from, to)` is the same half-open rule the
//! event store reader enforces.

use chrono::{DateTime, Duration, Utc};
use meterbill_pricing::PriceResult;
use meterbill_tenant::TenantContext;
use meterbill_types::{EventWindow, MeteringError, MeteringResult};
use meterbill_upstream::{EventStoreReader, RatePlanFetcher, SubscriptionFetcher};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MeterRequest {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub subscription_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub rate_plan_id: Option<String>,
    pub billable_metric_id: Option<String>,
}

/// Result of a single metering estimate: the priced breakdown plus the
/// identifiers that were resolved along the way, which `InvoiceService`
/// needs to attach to the persisted invoice.
#[derive(Debug, Clone)]
pub struct MeterResponse {
    pub price: PriceResult,
    pub rate_plan_id: String,
    pub product_id: Option<Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

pub struct MeteringService {
    event_store: Arc<dyn EventStoreReader>,
    rate_plan_fetcher: Arc<dyn RatePlanFetcher>,
    subscription_fetcher: Arc<dyn SubscriptionFetcher>,
}

impl MeteringService {
    pub fn new(
        event_store: Arc<dyn EventStoreReader>,
        rate_plan_fetcher: Arc<dyn RatePlanFetcher>,
        subscription_fetcher: Arc<dyn SubscriptionFetcher>,
    ) -> Self {
        Self {
            event_store,
            rate_plan_fetcher,
            subscription_fetcher,
        }
    }

    pub async fn estimate(
        &self,
        ctx: &TenantContext,
        mut request: MeterRequest,
    ) -> MeteringResult<MeterResponse> {
        if ctx.organization_id.is_nil() {
            return Err(MeteringError::Unauthenticated(
                "tenant context missing organization id".into(),
            ));
        }

        if let Some(subscription_id) = request.subscription_id {
            let subscription = self.subscription_fetcher.get(ctx, subscription_id).await?;
            request.product_id = subscription.product_id;
            request.rate_plan_id = subscription.rate_plan_id.clone();

            if request.rate_plan_id.is_none() {
                return Err(MeteringError::InvalidState(format!(
                    "subscription {subscription_id} has no rate plan"
                )));
            }

            if request.from.is_none() && request.to.is_none() {
                request.from = subscription.current_billing_period_start;
                request.to = subscription.current_billing_period_end;
            }
        }

        let now = Utc::now();
        let (from, to) = match (request.from, request.to) {
            (Some(from), Some(to)) => (from, to),
            (Some(from), None) => (from, now),
            (None, Some(to)) => (now - Duration::hours(1), to),
            (None, None) => (now - Duration::hours(1), now),
        };

        let rate_plan_id = request
            .rate_plan_id
            .clone()
            .ok_or_else(|| MeteringError::InvalidArgument("rate_plan_id is required".into()))?;

        let rate_plan = self
            .rate_plan_fetcher
            .fetch(ctx, &rate_plan_id)
            .await
            .map_err(|e| match e {
                MeteringError::NotFound(message) => MeteringError::InvalidState(message),
                other => other,
            })?;

        let billable_metric_id = request
            .billable_metric_id
            .or_else(|| rate_plan.billable_metric_id.clone());

        let window = EventWindow {
            organization_id: ctx.organization_id,
            from,
            to,
            subscription_id: request.subscription_id,
            product_id: request.product_id,
            rate_plan_id: Some(rate_plan_id.clone()),
            billable_metric_id,
        };

        let actual_usage = self.event_store.count_events(&window).await?;
        let today = now.date_naive();
        let price = meterbill_pricing::price(&rate_plan, actual_usage, today);

        Ok(MeterResponse {
            price,
            rate_plan_id,
            product_id: request.product_id,
            window_start: from,
            window_end: to,
        })
    }
}
