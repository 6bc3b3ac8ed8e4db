//! Process entrypoint: loads configuration, wires the metering/invoicing
//! services together, and runs the billing-period monitor (C11) until a
//! shutdown signal arrives. HTTP transport, auth middleware, and schema
//! migration tooling are explicit non-goals (`spec.md` §1) — this binary
//! only starts the autonomous loop and the database connection it needs.

mod config;

use anyhow::{Context, Result};
use meterbill_invoicing::{HttpDownstreamNotifier, InvoiceService, MeteringService, PgInvoiceRepository};
use meterbill_monitor::{BillingPeriodMonitor, MonitorConfig};
use meterbill_tenant::CredentialIssuer;
use meterbill_upstream::{HttpRatePlanFetcher, HttpSubscriptionFetcher, SqlEventStoreReader};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = config::AppConfig::load().context("failed to load configuration")?;
    info!(cadence = %settings.monitor.cadence, "starting metering core");

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await
        .context("failed to connect to invoice database")?;

    let invoice_repository = Arc::new(PgInvoiceRepository::new(pool.clone()));
    invoice_repository
        .initialize_schema()
        .await
        .context("failed to initialize invoice schema")?;

    let call_timeout = Duration::from_secs(settings.upstream.call_timeout_seconds);
    let event_store = Arc::new(SqlEventStoreReader::new(pool));
    let rate_plan_fetcher = Arc::new(HttpRatePlanFetcher::new(
        settings.upstream.rate_plan_base_url.clone(),
        call_timeout,
    ));
    let subscription_fetcher = Arc::new(HttpSubscriptionFetcher::new(
        settings.upstream.subscription_base_url.clone(),
        call_timeout,
    ));
    let notifier = Arc::new(HttpDownstreamNotifier::new(
        settings.upstream.notifier_base_url.clone(),
        call_timeout,
    ));

    let credential_issuer = Arc::new(CredentialIssuer::new(
        &settings.credential.secret,
        settings.credential.issuer.clone(),
        chrono::Duration::seconds(settings.credential.ttl_seconds),
    ));

    let metering_service = Arc::new(MeteringService::new(
        event_store.clone(),
        rate_plan_fetcher,
        subscription_fetcher.clone(),
    ));
    let invoice_service = Arc::new(InvoiceService::new(invoice_repository.clone(), notifier));

    let monitor = Arc::new(BillingPeriodMonitor::new(
        event_store,
        subscription_fetcher,
        invoice_repository,
        credential_issuer,
        metering_service,
        invoice_service,
        MonitorConfig {
            cadence: settings.monitor.cadence.clone(),
        },
    ));
    let shutdown_token = monitor.shutdown_token();

    let mut scheduler = monitor
        .clone()
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start billing-period monitor: {e}"))?;

    info!("billing-period monitor running");

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "unable to listen for shutdown signal"),
    }

    shutdown_token.cancel();
    if let Err(e) = scheduler.shutdown().await {
        error!(error = %e, "error shutting down scheduler");
    }

    info!("metering core stopped");
    Ok(())
}
