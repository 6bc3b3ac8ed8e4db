//! C9 — Downstream Notifier. Best-effort `POST /webhook/invoice-created` to
//! the accounting-sync collaborator. Fire-and-forget is enforced at the type
//! level: `notify` is a plain (non-async, non-`Result`) method that spawns
//! the call and logs the outcome; it has no way to hand a failure back to
//! the invoice service that called it.

use async_trait::async_trait;
use meterbill_tenant::TenantContext;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct InvoiceCreatedPayload {
    invoice_id: i64,
    organization_id: Uuid,
    customer_id: Uuid,
    invoice_number: String,
    total_amount: Decimal,
    credential: String,
}

/// Outcome of a bulk resync: how many invoices were attempted and how many
/// notifications the downstream collaborator acknowledged with a 2xx.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResyncReport {
    pub attempted: usize,
    pub succeeded: usize,
}

#[async_trait]
pub trait DownstreamNotifier: Send + Sync {
    /// Launches the notification asynchronously and returns immediately.
    /// Never surfaces a failure to the caller — C8's persisted invoice is
    /// the source of truth regardless of whether this call lands.
    fn notify(
        &self,
        ctx: TenantContext,
        invoice_id: i64,
        customer_id: Uuid,
        invoice_number: String,
        total_amount: Decimal,
    );

    /// Re-fires notifications for every invoice in `invoices`, sequentially,
    /// and reports how many the collaborator acknowledged. Used by the
    /// bulk resync operation described in `spec.md` §4.9.
    async fn resync(
        &self,
        ctx: &TenantContext,
        invoices: Vec<(i64, Uuid, String, Decimal)>,
    ) -> ResyncReport;
}

pub struct HttpDownstreamNotifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDownstreamNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn post_once(
        &self,
        ctx: &TenantContext,
        invoice_id: i64,
        customer_id: Uuid,
        invoice_number: &str,
        total_amount: Decimal,
    ) -> Result<(), String> {
        let url = format!("{}/webhook/invoice-created", self.base_url);
        let payload = InvoiceCreatedPayload {
            invoice_id,
            organization_id: ctx.organization_id,
            customer_id,
            invoice_number: invoice_number.to_string(),
            total_amount,
            credential: ctx.credential.token.clone(),
        };
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        // Response body is ignored per spec.md §6; only the status matters.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("notifier responded with {}", response.status()))
        }
    }
}

#[async_trait]
impl DownstreamNotifier for HttpDownstreamNotifier {
    fn notify(
        &self,
        ctx: TenantContext,
        invoice_id: i64,
        customer_id: Uuid,
        invoice_number: String,
        total_amount: Decimal,
    ) {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let notifier = HttpDownstreamNotifier { client, base_url, timeout };
            match notifier
                .post_once(&ctx, invoice_id, customer_id, &invoice_number, total_amount)
                .await
            {
                Ok(()) => info!(invoice_id, %invoice_number, "downstream notification delivered"),
                Err(message) => error!(invoice_id, %invoice_number, error = %message, "downstream notification failed"),
            }
        });
    }

    async fn resync(
        &self,
        ctx: &TenantContext,
        invoices: Vec<(i64, Uuid, String, Decimal)>,
    ) -> ResyncReport {
        let mut report = ResyncReport::default();
        for (invoice_id, customer_id, invoice_number, total_amount) in invoices {
            report.attempted += 1;
            match self
                .post_once(ctx, invoice_id, customer_id, &invoice_number, total_amount)
                .await
            {
                Ok(()) => report.succeeded += 1,
                Err(message) => {
                    error!(invoice_id, %invoice_number, error = %message, "resync notification failed");
                }
            }
        }
        report
    }
}

/// No-op notifier for tests and for deployments that haven't configured an
/// accounting-sync collaborator yet.
pub struct NullDownstreamNotifier;

#[async_trait]
impl DownstreamNotifier for NullDownstreamNotifier {
    fn notify(&self, _ctx: TenantContext, _invoice_id: i64, _customer_id: Uuid, _invoice_number: String, _total_amount: Decimal) {}

    async fn resync(&self, _ctx: &TenantContext, invoices: Vec<(i64, Uuid, String, Decimal)>) -> ResyncReport {
        ResyncReport {
            attempted: invoices.len(),
            succeeded: 0,
        }
    }
}

pub type SharedNotifier = Arc<dyn DownstreamNotifier>;

#[cfg(test)]
mod tests {
    use super::*;
    use meterbill_tenant::ServiceCredential;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fake_ctx() -> TenantContext {
        let org = Uuid::new_v4();
        TenantContext::new(
            org,
            ServiceCredential {
                token: "tok".into(),
                tenant_id: org,
                issued_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(2),
            },
        )
    }

    #[tokio::test]
    async fn resync_reports_partial_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/invoice-created"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhook/invoice-created"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = HttpDownstreamNotifier::new(server.uri(), Duration::from_secs(5));
        let ctx = fake_ctx();
        let report = notifier
            .resync(
                &ctx,
                vec![
                    (1, Uuid::new_v4(), "INV-1".into(), dec!(10.00)),
                    (2, Uuid::new_v4(), "INV-2".into(), dec!(20.00)),
                ],
            )
            .await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
    }
}
