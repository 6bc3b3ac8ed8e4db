//! C6–C9: metering orchestration, invoice persistence, invoice creation, and
//! best-effort downstream notification. `meterbill-monitor` is the only
//! other crate that depends on this one; everything here is also usable
//! directly by a request-initiated caller (ad-hoc metering/invoicing), which
//! is why every public operation takes an explicit `TenantContext` rather
//! than assuming it is always the monitor calling.

pub mod invoice_number;
pub mod invoice_service;
pub mod metering;
pub mod notifier;
pub mod repository;

pub use invoice_service::{InvoiceCreated, InvoiceService};
pub use metering::{MeterRequest, MeterResponse, MeteringService};
pub use notifier::{DownstreamNotifier, HttpDownstreamNotifier, NullDownstreamNotifier, ResyncReport};
pub use repository::{InvoiceRepository, PgInvoiceRepository, SaveOutcome};
