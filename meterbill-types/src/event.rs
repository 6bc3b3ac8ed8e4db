use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an event recorded in the (external, read-only) event store.
///
/// Only `Success` events are billable; every other status exists purely so
/// the store can retain failed/ingestion-in-progress rows without this core
/// ever counting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Success,
    Failed,
    Pending,
}

/// One immutable row in the event store. This core never writes these; it
/// only counts them through `meterbill-upstream::EventStoreReader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillableEvent {
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub rate_plan_id: Option<String>,
    pub billable_metric_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
}

/// Filters accepted by `count_events`. `from` is inclusive, `to` is
/// exclusive — the half-open window rule used everywhere in this core.
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub organization_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub subscription_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub rate_plan_id: Option<String>,
    pub billable_metric_id: Option<String>,
}
