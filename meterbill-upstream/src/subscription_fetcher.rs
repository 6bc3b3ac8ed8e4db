//! C4 — Subscription Fetcher.
//!
//! `GET /subscriptions/{id}` and `GET /subscriptions?organizationId=...&status=ACTIVE`.
//! `list_active` returns an empty sequence on upstream failure rather than
//! propagating an error — the monitor treats a failed enumeration as
//! "nothing to do this tick" instead of aborting the whole run
//! (`spec.md` §4.4). The client carries the same `reqwest-middleware` +
//! `reqwest-retry` transient-retry stack as the rate-plan fetcher (C3).

use async_trait::async_trait;
use meterbill_tenant::TenantContext;
use meterbill_types::{MeteringError, MeteringResult, Subscription};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionFetcher: Send + Sync {
    async fn get(&self, ctx: &TenantContext, subscription_id: Uuid) -> MeteringResult<Subscription>;

    /// Every ACTIVE subscription for the tenant. Empty on upstream failure.
    async fn list_active(&self, ctx: &TenantContext, organization_id: Uuid) -> Vec<Subscription>;
}

pub struct HttpSubscriptionFetcher {
    client: ClientWithMiddleware,
    base_url: String,
    timeout: Duration,
}

impl HttpSubscriptionFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SubscriptionFetcher for HttpSubscriptionFetcher {
    async fn get(&self, ctx: &TenantContext, subscription_id: Uuid) -> MeteringResult<Subscription> {
        let url = format!("{}/subscriptions/{}", self.base_url, subscription_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&ctx.credential.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MeteringError::UpstreamUnavailable(format!("subscription request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => response
                .json::<Subscription>()
                .await
                .map_err(|e| MeteringError::UpstreamUnavailable(format!("malformed subscription response: {e}"))),
            StatusCode::NOT_FOUND => {
                Err(MeteringError::NotFound(format!("subscription {subscription_id} not found")))
            }
            status => Err(MeteringError::UpstreamUnavailable(format!(
                "unexpected subscription service response: {status}"
            ))),
        }
    }

    async fn list_active(&self, ctx: &TenantContext, organization_id: Uuid) -> Vec<Subscription> {
        let url = format!("{}/subscriptions", self.base_url);
        let result = self
            .client
            .get(&url)
            .bearer_auth(&ctx.credential.token)
            .query(&[
                ("organizationId", organization_id.to_string()),
                ("status", "ACTIVE".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<Vec<Subscription>>().await {
                    Ok(subscriptions) => subscriptions,
                    Err(e) => {
                        warn!(%organization_id, error = %e, "malformed active-subscription list response");
                        Vec::new()
                    }
                }
            }
            Ok(response) => {
                warn!(%organization_id, status = %response.status(), "active-subscription list request failed");
                Vec::new()
            }
            Err(e) => {
                warn!(%organization_id, error = %e, "active-subscription list request errored");
                Vec::new()
            }
        }
    }
}
