//! C2 — Event Store Reader.
//!
//! The event store is a plain Postgres table (`spec.md` §6); this core never
//! writes to it and only ever issues `SELECT COUNT(*)` queries filtered on
//! the columns named in the spec. Grounded on the teacher's
//! `aerolithdb-saas::billing::BillingEngine::initialize_schema` /
//! `sqlx::query` conventions.

use async_trait::async_trait;
use meterbill_types::{EventWindow, MeteringError, MeteringResult};
use sqlx::{PgPool, QueryBuilder};

/// Contract for counting billable events in a half-open window
/// `[from, to)`. `from` is inclusive, `to` is exclusive — the unit-boundary
/// rule used everywhere in this core.
#[async_trait]
pub trait EventStoreReader: Send + Sync {
    async fn count_events(&self, window: &EventWindow) -> MeteringResult<u64>;

    /// Used by the billing-period monitor to discover which tenants have
    /// any ingested activity at all, before it bothers listing their
    /// subscriptions. Not part of `spec.md`'s C2 contract proper but implied
    /// by C11's "enumerate tenants (C2 over event store)" step.
    async fn list_tenants_with_activity(&self) -> MeteringResult<Vec<uuid::Uuid>>;
}

pub struct SqlEventStoreReader {
    pool: PgPool,
}

impl SqlEventStoreReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStoreReader for SqlEventStoreReader {
    async fn count_events(&self, window: &EventWindow) -> MeteringResult<u64> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM ingestion_event WHERE status = 'SUCCESS' \
             AND organization_id = ",
        );
        builder.push_bind(window.organization_id);
        builder.push(" AND timestamp >= ").push_bind(window.from);
        builder.push(" AND timestamp < ").push_bind(window.to);

        if let Some(subscription_id) = window.subscription_id {
            builder
                .push(" AND subscription_id = ")
                .push_bind(subscription_id);
        }
        if let Some(product_id) = window.product_id {
            builder.push(" AND product_id = ").push_bind(product_id);
        }
        if let Some(rate_plan_id) = &window.rate_plan_id {
            builder
                .push(" AND rate_plan_id = ")
                .push_bind(rate_plan_id.clone());
        }
        if let Some(metric_id) = &window.billable_metric_id {
            builder
                .push(" AND billable_metric_id = ")
                .push_bind(metric_id.clone());
        }

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MeteringError::StorageError(format!("count_events query failed: {e}")))?;

        Ok(count.max(0) as u64)
    }

    async fn list_tenants_with_activity(&self) -> MeteringResult<Vec<uuid::Uuid>> {
        let rows: Vec<uuid::Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT organization_id FROM ingestion_event WHERE status = 'SUCCESS'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeteringError::StorageError(format!("tenant enumeration failed: {e}")))?;
        Ok(rows)
    }
}
