//! Shared domain model for the usage-metering and invoice-generation core.
//!
//! This crate has no I/O and no async runtime dependency: it exists purely
//! to give every other crate in the workspace one definition of `RatePlan`,
//! `Subscription`, `BillableEvent`, `Invoice`, and the error taxonomy they
//! all propagate.

pub mod error;
pub mod event;
pub mod invoice;
pub mod rate_plan;
pub mod subscription;

pub use error::{MeteringError, MeteringResult};
pub use event::{BillableEvent, EventStatus, EventWindow};
pub use invoice::{Invoice, InvoiceLineItem, InvoiceStatus};
pub use rate_plan::{
    Discount, DiscountKind, FlatFee, Freemium, MinimumCommitment, RatePlan, StairStep,
    StairStepPricing, Tier, TieredPricing, UnitRange, UsagePricing, VolumePricing,
};
pub use subscription::{Subscription, SubscriptionStatus};
