//! C3 — Rate-Plan Fetcher.
//!
//! `GET /rateplans/{id}`, with a one-shot fallback to `GET /rateplans` plus a
//! local lookup on transient (5xx) upstream failure — the single
//! application-level exception to "retries are not performed inside the
//! core" (`spec.md` §5), justified by the monitor's inability to
//! distinguish "plan missing" from "plan momentarily unreachable". Below
//! that, the client itself carries `reqwest-middleware` +
//! `reqwest-retry`'s `RetryTransientMiddleware` for transport-level
//! retries (connection resets, timeouts) that never surface as an
//! application-visible failure at all.
//!
//! Grounded on the teacher pack's Orb API client shape
//! (`MaterializeInc-rust-orb-billing::client::plans`): a
//! `ClientWithMiddleware`, a `base_url`, and typed request/response
//! structs.

use async_trait::async_trait;
use meterbill_tenant::TenantContext;
use meterbill_types::{MeteringError, MeteringResult, RatePlan};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait RatePlanFetcher: Send + Sync {
    async fn fetch(&self, ctx: &TenantContext, rate_plan_id: &str) -> MeteringResult<RatePlan>;
}

pub struct HttpRatePlanFetcher {
    client: ClientWithMiddleware,
    base_url: String,
    timeout: Duration,
}

impl HttpRatePlanFetcher {
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

    async fn get_one(&self, ctx: &TenantContext, rate_plan_id: &str) -> MeteringResult<Option<RatePlan>> {
        let url = format!("{}/rateplans/{}", self.base_url, rate_plan_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&ctx.credential.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MeteringError::UpstreamUnavailable(format!("rate plan request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let plan = response
                    .json::<RatePlan>()
                    .await
                    .map_err(|e| MeteringError::UpstreamUnavailable(format!("malformed rate plan response: {e}")))?;
                Ok(Some(plan))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_server_error() => Err(MeteringError::UpstreamUnavailable(format!(
                "rate plan service returned {status}"
            ))),
            status => Err(MeteringError::UpstreamUnavailable(format!(
                "unexpected rate plan service response: {status}"
            ))),
        }
    }

    async fn list_all(&self, ctx: &TenantContext) -> MeteringResult<Vec<RatePlan>> {
        let url = format!("{}/rateplans", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&ctx.credential.token)
            .query(&[("organizationId", ctx.organization_id.to_string())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MeteringError::UpstreamUnavailable(format!("rate plan list request failed: {e}")))?;

        response
            .json::<Vec<RatePlan>>()
            .await
            .map_err(|e| MeteringError::UpstreamUnavailable(format!("malformed rate plan list response: {e}")))
    }
}

#[async_trait]
impl RatePlanFetcher for HttpRatePlanFetcher {
    async fn fetch(&self, ctx: &TenantContext, rate_plan_id: &str) -> MeteringResult<RatePlan> {
        match self.get_one(ctx, rate_plan_id).await {
            Ok(Some(plan)) => Ok(plan),
            Ok(None) => Err(MeteringError::NotFound(format!("rate plan {rate_plan_id} not found"))),
            Err(MeteringError::UpstreamUnavailable(message)) if message.contains("returned 5") => {
                warn!(rate_plan_id, %message, "rate plan fetch hit a transient failure, falling back to list+filter");
                let plans = self.list_all(ctx).await?;
                plans
                    .into_iter()
                    .find(|p| p.rate_plan_id == rate_plan_id)
                    .ok_or_else(|| {
                        debug!(rate_plan_id, "fallback enumeration did not contain the requested plan");
                        MeteringError::NotFound(format!("rate plan {rate_plan_id} not found"))
                    })
            }
            Err(other) => Err(other),
        }
    }
}
