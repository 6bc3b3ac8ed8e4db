//! C11 — Billing-Period Monitor.
//!
//! The autonomous loop: on a fixed cadence it enumerates every tenant with
//! ingested activity, lists each tenant's active subscriptions, decides
//! which billing periods have closed, and drives idempotent invoice
//! creation through `meterbill-invoicing`'s `MeteringService`/
//! `InvoiceService`. Failure to process one subscription never affects its
//! siblings; failure to process one tenant never affects others — only
//! enumeration failure (event store unreachable, credential issuer broken)
//! aborts a tick.

mod monitor;

pub use monitor::{BillingPeriodMonitor, MonitorConfig, TickSummary};
