use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Paused,
}

/// Subscription metadata as fetched from the (external, read-only)
/// subscription service. `current_billing_period_{start,end}` drive both the
/// default window used by `meterbill-invoicing::MeteringService` and the
/// `shouldClose` decision in `meterbill-monitor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub organization_id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Option<Uuid>,
    pub rate_plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_billing_period_start: Option<DateTime<Utc>>,
    pub current_billing_period_end: Option<DateTime<Utc>>,
    pub billing_frequency: String,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}
