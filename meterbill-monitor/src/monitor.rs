use meterbill_invoicing::{InvoiceRepository, InvoiceService, MeterRequest, MeteringService};
use meterbill_tenant::{CredentialIssuer, TenantContext};
use meterbill_types::{MeteringError, Subscription};
use meterbill_upstream::{EventStoreReader, SubscriptionFetcher};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default cadence: every 10 minutes, clock-aligned. Six-field
/// `tokio-cron-scheduler` cron: `sec min hour dom month dow`.
pub const DEFAULT_CADENCE: &str = "0 */10 * * * *";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cadence: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE.to_string(),
        }
    }
}

/// Counts-only report for one tick, per `spec.md` §4.11/§7 ("the monitor's
/// externally observable surface is logs and metrics only").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tenants_scanned: usize,
    pub subscriptions_scanned: usize,
    pub invoices_created: usize,
    pub duplicates_skipped: usize,
    pub tenant_failures: usize,
    pub subscription_failures: usize,
}

/// The periodic control loop described in `spec.md` §4.11. Holds everything
/// it needs to run a tick end to end: a way to discover tenants, a way to
/// list a tenant's active subscriptions, the authoritative uniqueness probe,
/// a credential issuer to mint per-tenant service context, and the metering
/// + invoicing services that do the actual pricing and persistence.
pub struct BillingPeriodMonitor {
    event_store: Arc<dyn EventStoreReader>,
    subscription_fetcher: Arc<dyn SubscriptionFetcher>,
    invoice_repository: Arc<dyn InvoiceRepository>,
    credential_issuer: Arc<CredentialIssuer>,
    metering_service: Arc<MeteringService>,
    invoice_service: Arc<InvoiceService>,
    shutdown: CancellationToken,
    config: MonitorConfig,
}

impl BillingPeriodMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_store: Arc<dyn EventStoreReader>,
        subscription_fetcher: Arc<dyn SubscriptionFetcher>,
        invoice_repository: Arc<dyn InvoiceRepository>,
        credential_issuer: Arc<CredentialIssuer>,
        metering_service: Arc<MeteringService>,
        invoice_service: Arc<InvoiceService>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            event_store,
            subscription_fetcher,
            invoice_repository,
            credential_issuer,
            metering_service,
            invoice_service,
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// A cloneable handle that, when cancelled, stops the in-flight tick
    /// from enumerating further subscriptions/tenants. The subscription (or
    /// tenant) currently being processed is allowed to finish, since an
    /// in-flight invoice write must complete atomically — per `spec.md` §5.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Registers this monitor on a `tokio-cron-scheduler` job at the
    /// configured cadence and starts the scheduler. Returns the running
    /// scheduler so the caller can hold it (and shut it down) alongside the
    /// rest of the process's lifecycle.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler, MeteringError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| MeteringError::InvalidState(format!("scheduler init failed: {e}")))?;

        let monitor = Arc::clone(&self);
        let job = Job::new_async(self.config.cadence.as_str(), move |_job_id, _lock| {
            let monitor = Arc::clone(&monitor);
            Box::pin(async move {
                monitor.run_tick().await;
            })
        })
        .map_err(|e| MeteringError::InvalidState(format!("invalid monitor cadence: {e}")))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| MeteringError::InvalidState(format!("job registration failed: {e}")))?;

        scheduler
            .start()
            .await
            .map_err(|e| MeteringError::InvalidState(format!("scheduler start failed: {e}")))?;

        info!(cadence = %self.config.cadence, "billing-period monitor scheduled");
        Ok(scheduler)
    }

    /// Runs exactly one tick of the state machine in `spec.md` §4.11. Public
    /// so tests (and a manual admin trigger) can drive the monitor without
    /// going through the cron scheduler.
    pub async fn run_tick(&self) -> TickSummary {
        let tick_id = Uuid::new_v4();
        let tick_span = info_span!("billing_tick", %tick_id);
        async {
            let started = std::time::Instant::now();
            let mut summary = TickSummary::default();

            let tenants = match self.event_store.list_tenants_with_activity().await {
                Ok(tenants) => tenants,
                Err(e) => {
                    error!(error = %e, "tenant enumeration failed, aborting tick");
                    metrics::counter!("meterbill_monitor_ticks_aborted_total").increment(1);
                    return summary;
                }
            };

            for tenant_id in tenants {
                if self.shutdown.is_cancelled() {
                    info!("shutdown requested, stopping tenant enumeration");
                    break;
                }
                summary.tenants_scanned += 1;
                if let Err(e) = self.process_tenant(tenant_id, &mut summary).await {
                    summary.tenant_failures += 1;
                    warn!(%tenant_id, error = %e, "tenant processing failed");
                }
            }

            metrics::gauge!("meterbill_monitor_tenants_scanned").set(summary.tenants_scanned as f64);
            metrics::gauge!("meterbill_monitor_subscriptions_scanned")
                .set(summary.subscriptions_scanned as f64);
            metrics::counter!("meterbill_monitor_invoices_created_total")
                .increment(summary.invoices_created as u64);
            metrics::counter!("meterbill_monitor_duplicate_ticks_total")
                .increment(summary.duplicates_skipped as u64);
            metrics::histogram!("meterbill_monitor_tick_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            info!(
                tenants = summary.tenants_scanned,
                subscriptions = summary.subscriptions_scanned,
                invoices_created = summary.invoices_created,
                duplicates_skipped = summary.duplicates_skipped,
                tenant_failures = summary.tenant_failures,
                subscription_failures = summary.subscription_failures,
                "tick complete"
            );

            summary
        }
        .instrument(tick_span)
        .await
    }

    async fn process_tenant(
        &self,
        tenant_id: Uuid,
        summary: &mut TickSummary,
    ) -> Result<(), MeteringError> {
        let credential = self.credential_issuer.issue(tenant_id)?;
        let ctx = TenantContext::new(tenant_id, credential);

        let subscriptions = self.subscription_fetcher.list_active(&ctx, tenant_id).await;
        for subscription in &subscriptions {
            if self.shutdown.is_cancelled() {
                info!(%tenant_id, "shutdown requested, stopping subscription enumeration");
                break;
            }
            summary.subscriptions_scanned += 1;
            match self.process_subscription(&ctx, subscription).await {
                Ok(true) => summary.invoices_created += 1,
                Ok(false) => {}
                Err(MeteringError::AlreadyExists(message)) => {
                    // Expected under concurrent/retried ticks — per spec.md
                    // §7 this is logged at debug, never warn.
                    debug!(
                        subscription_id = %subscription.subscription_id,
                        %message,
                        "duplicate tick: invoice already exists for this period"
                    );
                    summary.duplicates_skipped += 1;
                }
                Err(e) => {
                    summary.subscription_failures += 1;
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "subscription processing failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` if an invoice was created, `Ok(false)` if the
    /// period has not closed (or already has an invoice and `should_close`
    /// itself filtered it out before ever attempting a create).
    async fn process_subscription(
        &self,
        ctx: &TenantContext,
        subscription: &Subscription,
    ) -> Result<bool, MeteringError> {
        if !self.should_close(ctx, subscription).await? {
            return Ok(false);
        }
        self.generate_invoice(ctx, subscription).await?;
        Ok(true)
    }

    /// `spec.md` §4.11: true iff both period bounds are set, `now >= end`,
    /// and no invoice already exists for the triple. The uniqueness
    /// invariant is enforced by the repository regardless of this check —
    /// this is an optimization to avoid a wasted metering/pricing pass, not
    /// the source of correctness under concurrency.
    async fn should_close(
        &self,
        ctx: &TenantContext,
        subscription: &Subscription,
    ) -> Result<bool, MeteringError> {
        let (Some(start), Some(end)) = (
            subscription.current_billing_period_start,
            subscription.current_billing_period_end,
        ) else {
            return Ok(false);
        };
        if chrono::Utc::now() < end {
            return Ok(false);
        }
        let exists = self
            .invoice_repository
            .exists_for_period(ctx.organization_id, subscription.subscription_id, start, end)
            .await?;
        Ok(!exists)
    }

    async fn generate_invoice(
        &self,
        ctx: &TenantContext,
        subscription: &Subscription,
    ) -> Result<(), MeteringError> {
        let start = subscription
            .current_billing_period_start
            .expect("should_close already verified this is set");
        let end = subscription
            .current_billing_period_end
            .expect("should_close already verified this is set");

        let request = MeterRequest {
            from: Some(start),
            to: Some(end),
            subscription_id: Some(subscription.subscription_id),
            product_id: None,
            rate_plan_id: None,
            billable_metric_id: None,
        };
        let meter_response = self.metering_service.estimate(ctx, request).await?;
        self.invoice_service
            .create(
                ctx,
                meter_response,
                subscription.customer_id,
                Some(subscription.subscription_id),
                start,
                end,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use meterbill_invoicing::{DownstreamNotifier, NullDownstreamNotifier, SaveOutcome};
    use meterbill_types::{FlatFee, Invoice, InvoiceStatus, RatePlan, SubscriptionStatus};
    use meterbill_types::rate_plan::BillingFrequency;
    use meterbill_upstream::RatePlanFetcher;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeEventStore {
        tenant_id: Uuid,
        usage: u64,
    }

    #[async_trait]
    impl EventStoreReader for FakeEventStore {
        async fn count_events(
            &self,
            _window: &meterbill_types::EventWindow,
        ) -> Result<u64, MeteringError> {
            Ok(self.usage)
        }

        async fn list_tenants_with_activity(&self) -> Result<Vec<Uuid>, MeteringError> {
            Ok(vec![self.tenant_id])
        }
    }

    struct FakeRatePlanFetcher {
        plan: RatePlan,
    }

    #[async_trait]
    impl RatePlanFetcher for FakeRatePlanFetcher {
        async fn fetch(&self, _ctx: &TenantContext, _rate_plan_id: &str) -> Result<RatePlan, MeteringError> {
            Ok(self.plan.clone())
        }
    }

    struct FakeSubscriptionFetcher {
        subscription: Subscription,
    }

    #[async_trait]
    impl SubscriptionFetcher for FakeSubscriptionFetcher {
        async fn get(&self, _ctx: &TenantContext, _subscription_id: Uuid) -> Result<Subscription, MeteringError> {
            Ok(self.subscription.clone())
        }

        async fn list_active(&self, _ctx: &TenantContext, _organization_id: Uuid) -> Vec<Subscription> {
            vec![self.subscription.clone()]
        }
    }

    #[derive(Default)]
    struct FakeRepository {
        invoices: Mutex<Vec<Invoice>>,
    }

    #[async_trait]
    impl InvoiceRepository for FakeRepository {
        async fn save(&self, mut invoice: Invoice) -> SaveOutcome {
            let mut invoices = self.invoices.lock().unwrap();
            let duplicate = invoices.iter().any(|existing| {
                existing.organization_id == invoice.organization_id
                    && existing.subscription_id == invoice.subscription_id
                    && existing.billing_period_start == invoice.billing_period_start
                    && existing.billing_period_end == invoice.billing_period_end
            });
            if duplicate {
                return SaveOutcome::PeriodAlreadyExists;
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
            Ok(self.invoices.lock().unwrap().iter().any(|i| {
                i.organization_id == organization_id
                    && i.subscription_id == Some(subscription_id)
                    && i.billing_period_start == start
                    && i.billing_period_end == end
            }))
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

    fn closed_period_subscription(organization_id: Uuid) -> Subscription {
        let end = Utc::now() - Duration::minutes(5);
        let start = end - Duration::days(30);
        Subscription {
            subscription_id: Uuid::new_v4(),
            organization_id,
            customer_id: Uuid::new_v4(),
            product_id: None,
            rate_plan_id: Some("rp_monitor".into()),
            status: SubscriptionStatus::Active,
            current_billing_period_start: Some(start),
            current_billing_period_end: Some(end),
            billing_frequency: "MONTHLY".into(),
        }
    }

    fn flat_fee_plan() -> RatePlan {
        RatePlan {
            rate_plan_id: "rp_monitor".into(),
            organization_id: Uuid::nil(),
            billing_frequency: BillingFrequency("MONTHLY".into()),
            billable_metric_id: None,
            flat_fee: Some(FlatFee {
                amount: dec!(50.00),
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
        }
    }

    fn build_monitor(repository: Arc<FakeRepository>) -> BillingPeriodMonitor {
        let organization_id = Uuid::new_v4();
        let subscription = closed_period_subscription(organization_id);

        let event_store = Arc::new(FakeEventStore {
            tenant_id: organization_id,
            usage: 10,
        });
        let subscription_fetcher = Arc::new(FakeSubscriptionFetcher {
            subscription: subscription.clone(),
        });
        let rate_plan_fetcher = Arc::new(FakeRatePlanFetcher { plan: flat_fee_plan() });
        let credential_issuer = Arc::new(CredentialIssuer::with_default_ttl(
            "test-secret",
            "metering-service",
        ));

        let metering_service = Arc::new(MeteringService::new(
            event_store.clone(),
            rate_plan_fetcher,
            subscription_fetcher.clone(),
        ));
        let invoice_service = Arc::new(InvoiceService::new(
            repository.clone(),
            Arc::new(NullDownstreamNotifier) as Arc<dyn DownstreamNotifier>,
        ));

        BillingPeriodMonitor::new(
            event_store,
            subscription_fetcher,
            repository,
            credential_issuer,
            metering_service,
            invoice_service,
            MonitorConfig::default(),
        )
    }

    /// S6 — a forced second tick over the same closed period must observe
    /// `exists_for_period = true` and create no second invoice.
    #[tokio::test]
    async fn second_tick_over_same_closed_period_is_idempotent() {
        let repository = Arc::new(FakeRepository::default());
        let monitor = build_monitor(repository.clone());

        let first = monitor.run_tick().await;
        assert_eq!(first.invoices_created, 1);
        assert_eq!(first.duplicates_skipped, 0);

        let second = monitor.run_tick().await;
        assert_eq!(second.invoices_created, 0);
        assert_eq!(second.duplicates_skipped, 1);

        let all_invoices = repository.invoices.lock().unwrap();
        assert_eq!(all_invoices.len(), 1);
    }

    #[tokio::test]
    async fn open_period_is_left_alone() {
        let repository = Arc::new(FakeRepository::default());
        let organization_id = Uuid::new_v4();
        let mut subscription = closed_period_subscription(organization_id);
        subscription.current_billing_period_end = Some(Utc::now() + Duration::days(10));

        let event_store = Arc::new(FakeEventStore {
            tenant_id: organization_id,
            usage: 10,
        });
        let subscription_fetcher = Arc::new(FakeSubscriptionFetcher {
            subscription: subscription.clone(),
        });
        let rate_plan_fetcher = Arc::new(FakeRatePlanFetcher { plan: flat_fee_plan() });
        let credential_issuer = Arc::new(CredentialIssuer::with_default_ttl(
            "test-secret",
            "metering-service",
        ));
        let metering_service = Arc::new(MeteringService::new(
            event_store.clone(),
            rate_plan_fetcher,
            subscription_fetcher.clone(),
        ));
        let invoice_service = Arc::new(InvoiceService::new(
            repository.clone(),
            Arc::new(NullDownstreamNotifier) as Arc<dyn DownstreamNotifier>,
        ));
        let monitor = BillingPeriodMonitor::new(
            event_store,
            subscription_fetcher,
            repository.clone(),
            credential_issuer,
            metering_service,
            invoice_service,
            MonitorConfig::default(),
        );

        let summary = monitor.run_tick().await;
        assert_eq!(summary.invoices_created, 0);
        assert!(repository.invoices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_token_stops_further_enumeration() {
        let repository = Arc::new(FakeRepository::default());
        let monitor = build_monitor(repository.clone());
        monitor.request_shutdown();

        let summary = monitor.run_tick().await;
        assert_eq!(summary.tenants_scanned, 0);
        assert_eq!(summary.invoices_created, 0);
    }
}
