//! C8 — Invoice Service. Turns a `MeterResponse` into a persisted invoice:
//! duplicate guard, deterministic invoice number, line items in pipeline
//! order, persist, then a local creation notification and a fire-and-forget
//! handoff to the downstream notifier (C9).

use crate::invoice_number;
use crate::metering::MeterResponse;
use crate::notifier::DownstreamNotifier;
use crate::repository::{InvoiceRepository, SaveOutcome};
use chrono::{DateTime, Utc};
use meterbill_tenant::TenantContext;
use meterbill_types::{Invoice, InvoiceLineItem, InvoiceStatus, MeteringError, MeteringResult};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// In-process notification fanned out after a successful persist, for any
/// local subscribers (e.g. a resync scheduler, cache invalidation). Distinct
/// from the downstream HTTP notification C9 sends to the accounting-sync
/// collaborator.
#[derive(Debug, Clone)]
pub struct InvoiceCreated {
    pub invoice_id: i64,
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub invoice_number: String,
    pub total_amount: rust_decimal::Decimal,
}

pub struct InvoiceService {
    repository: Arc<dyn InvoiceRepository>,
    notifier: Arc<dyn DownstreamNotifier>,
    created_tx: broadcast::Sender<InvoiceCreated>,
}

impl InvoiceService {
    pub fn new(repository: Arc<dyn InvoiceRepository>, notifier: Arc<dyn DownstreamNotifier>) -> Self {
        let (created_tx, _) = broadcast::channel(256);
        Self {
            repository,
            notifier,
            created_tx,
        }
    }

    /// Subscribe to locally-observed invoice creations. Lagging subscribers
    /// drop old events rather than block the creator — this is an
    /// observability fanout, not a delivery guarantee.
    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceCreated> {
        self.created_tx.subscribe()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        ctx: &TenantContext,
        meter_response: MeterResponse,
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeteringResult<Invoice> {
        if let Some(subscription_id) = subscription_id {
            let exists = self
                .repository
                .exists_for_period(ctx.organization_id, subscription_id, start, end)
                .await?;
            if exists {
                return Err(MeteringError::AlreadyExists(format!(
                    "invoice already exists for subscription {subscription_id} in [{start}, {end})"
                )));
            }
        }

        let line_items = meter_response
            .price
            .breakdown
            .iter()
            .enumerate()
            .map(|(idx, entry)| InvoiceLineItem {
                line_number: idx as u32 + 1,
                description: entry.label.clone(),
                calculation: entry.calculation.clone(),
                amount: entry.amount,
                quantity: None,
                unit_price: None,
            })
            .collect();

        let mut now_millis = Utc::now().timestamp_millis() as u128;
        let mut invoice = Invoice {
            id: None,
            organization_id: ctx.organization_id,
            customer_id,
            subscription_id,
            rate_plan_id: Some(meter_response.rate_plan_id.clone()),
            invoice_number: invoice_number::generate(now_millis, ctx.organization_id, customer_id),
            model_type: meter_response.price.model_type.clone(),
            total_amount: meter_response.price.total,
            billing_period_start: start,
            billing_period_end: end,
            status: InvoiceStatus::Draft,
            notes: None,
            created_at: None,
            updated_at: None,
            line_items,
        };

        // Retry once on an invoice_number collision specifically (a fresh
        // clock read yields a fresh `T`); a period collision is not retried
        // here because it is the expected, permanent ALREADY_EXISTS outcome.
        let saved = loop {
            match self.repository.save(invoice.clone()).await {
                SaveOutcome::Saved(saved) => break saved,
                SaveOutcome::PeriodAlreadyExists => {
                    return Err(MeteringError::AlreadyExists(format!(
                        "invoice already exists for organization {} subscription {:?} in [{start}, {end})",
                        ctx.organization_id, subscription_id
                    )));
                }
                SaveOutcome::InvoiceNumberCollision => {
                    now_millis += 1;
                    invoice.invoice_number =
                        invoice_number::generate(now_millis, ctx.organization_id, customer_id);
                    continue;
                }
                SaveOutcome::Storage(e) => return Err(e),
            }
        };

        info!(
            invoice_id = saved.id,
            invoice_number = %saved.invoice_number,
            total = %saved.total_amount,
            "invoice created"
        );

        let event = InvoiceCreated {
            invoice_id: saved.id.expect("persisted invoice always has an id"),
            organization_id: saved.organization_id,
            subscription_id: saved.subscription_id,
            invoice_number: saved.invoice_number.clone(),
            total_amount: saved.total_amount,
        };
        // No subscribers is not an error; this channel is best-effort.
        let _ = self.created_tx.send(event);

        debug!(invoice_id = saved.id, "handing invoice off to downstream notifier");
        self.notifier.notify(
            ctx.clone(),
            saved.id.expect("persisted invoice always has an id"),
            saved.customer_id,
            saved.invoice_number.clone(),
            saved.total_amount,
        );

        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NullDownstreamNotifier;
    use async_trait::async_trait;
    use meterbill_tenant::ServiceCredential;
    use meterbill_types::RatePlan;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRepository {
        invoices: Mutex<Vec<Invoice>>,
        existing_periods: Mutex<Vec<(Uuid, Uuid, DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl InvoiceRepository for FakeRepository {
        async fn save(&self, mut invoice: Invoice) -> SaveOutcome {
            let mut invoices = self.invoices.lock().unwrap();
            if let Some(subscription_id) = invoice.subscription_id {
                let duplicate = invoices.iter().any(|existing| {
                    existing.organization_id == invoice.organization_id
                        && existing.subscription_id == Some(subscription_id)
                        && existing.billing_period_start == invoice.billing_period_start
                        && existing.billing_period_end == invoice.billing_period_end
                });
                if duplicate {
                    return SaveOutcome::PeriodAlreadyExists;
                }
            }
            invoice.id = Some(invoices.len() as i64 + 1);
            invoice.created_at = Some(Utc::now());
            invoice.updated_at = invoice.created_at;
            invoices.push(invoice.clone());
            SaveOutcome::Saved(invoice)
        }

        async fn find_by_id(&self, organization_id: Uuid, id: i64) -> Result<Option<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.organization_id == organization_id && i.id == Some(id))
                .cloned())
        }

        async fn find_by_number(&self, organization_id: Uuid, invoice_number: &str) -> Result<Option<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.organization_id == organization_id && i.invoice_number == invoice_number)
                .cloned())
        }

        async fn exists_for_period(
            &self,
            organization_id: Uuid,
            subscription_id: Uuid,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<bool, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .any(|i| {
                    i.organization_id == organization_id
                        && i.subscription_id == Some(subscription_id)
                        && i.billing_period_start == start
                        && i.billing_period_end == end
                })
                || self
                    .existing_periods
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|(org, sub, s, e)| *org == organization_id && *sub == subscription_id && *s == start && *e == end))
        }

        async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.organization_id == organization_id)
                .cloned()
                .collect())
        }

        async fn list_by_customer(&self, organization_id: Uuid, customer_id: Uuid) -> Result<Vec<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.organization_id == organization_id && i.customer_id == customer_id)
                .cloned()
                .collect())
        }

        async fn list_by_subscription(&self, organization_id: Uuid, subscription_id: Uuid) -> Result<Vec<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.organization_id == organization_id && i.subscription_id == Some(subscription_id))
                .cloned()
                .collect())
        }

        async fn list_by_status(&self, organization_id: Uuid, status: InvoiceStatus) -> Result<Vec<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.organization_id == organization_id && i.status as i32 == status as i32)
                .cloned()
                .collect())
        }

        async fn list_by_period(
            &self,
            organization_id: Uuid,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Invoice>, MeteringError> {
            Ok(self
                .invoices
                .lock()
                .unwrap()
                .iter()
                .filter(|i| {
                    i.organization_id == organization_id
                        && i.billing_period_start == start
                        && i.billing_period_end == end
                })
                .cloned()
                .collect())
        }

        async fn update_status(&self, _organization_id: Uuid, _id: i64, _status: InvoiceStatus) -> Result<(), MeteringError> {
            Ok(())
        }
    }

    fn ctx() -> TenantContext {
        let org = Uuid::new_v4();
        TenantContext::new(
            org,
            ServiceCredential {
                token: "t".into(),
                tenant_id: org,
                issued_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::hours(2),
            },
        )
    }

    fn meter_response() -> MeterResponse {
        let plan = RatePlan {
            rate_plan_id: "rp_1".into(),
            organization_id: Uuid::nil(),
            billing_frequency: meterbill_types::rate_plan::BillingFrequency("MONTHLY".into()),
            billable_metric_id: None,
            flat_fee: Some(meterbill_types::FlatFee {
                amount: dec!(100.00),
                included_units: 1_000,
                overage_rate: None,
            }),
            usage_pricings: vec![],
            tiered_pricings: vec![],
            volume_pricings: vec![],
            stair_step_pricings: vec![],
            setup_fees: vec![],
            freemiums: vec![],
            minimum_commitments: vec![],
            discounts: vec![],
        };
        let price = meterbill_pricing::price(&plan, 100, Utc::now().date_naive());
        MeterResponse {
            price,
            rate_plan_id: "rp_1".into(),
            product_id: None,
            window_start: Utc::now(),
            window_end: Utc::now(),
        }
    }

    #[tokio::test]
    async fn creates_invoice_with_line_items_matching_breakdown() {
        let repository = Arc::new(FakeRepository::default());
        let service = InvoiceService::new(repository, Arc::new(NullDownstreamNotifier));
        let ctx = ctx();
        let subscription_id = Uuid::new_v4();
        let start = Utc::now();
        let end = start + chrono::Duration::days(30);

        let response = meter_response();
        let expected_amount = response.price.breakdown[0].amount;

        let invoice = service
            .create(&ctx, response, Uuid::new_v4(), Some(subscription_id), start, end)
            .await
            .unwrap();

        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].line_number, 1);
        assert_eq!(invoice.line_items[0].amount, expected_amount);
        assert_eq!(invoice.total_amount, dec!(100.00));
        assert!(invoice.invoice_number.starts_with("INV-"));
    }

    #[tokio::test]
    async fn second_create_for_same_period_fails_with_already_exists() {
        let repository = Arc::new(FakeRepository::default());
        let service = InvoiceService::new(repository, Arc::new(NullDownstreamNotifier));
        let ctx = ctx();
        let subscription_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let start = Utc::now();
        let end = start + chrono::Duration::days(30);

        let first = service
            .create(&ctx, meter_response(), customer_id, Some(subscription_id), start, end)
            .await;
        assert!(first.is_ok());

        let second = service
            .create(&ctx, meter_response(), customer_id, Some(subscription_id), start, end)
            .await;
        assert!(matches!(second, Err(MeteringError::AlreadyExists(_))));
    }
}
