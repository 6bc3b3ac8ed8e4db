pub mod event_store;
pub mod rate_plan_fetcher;
pub mod subscription_fetcher;

pub use event_store::{EventStoreReader, SqlEventStoreReader};
pub use rate_plan_fetcher::{HttpRatePlanFetcher, RatePlanFetcher};
pub use subscription_fetcher::{HttpSubscriptionFetcher, SubscriptionFetcher};

#[cfg(test)]
mod tests {
    use super::*;
    use meterbill_tenant::{ServiceCredential, TenantContext};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fake_ctx(org_id: Uuid) -> TenantContext {
        TenantContext::new(
            org_id,
            ServiceCredential {
                token: "test-token".into(),
                tenant_id: org_id,
                issued_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(2),
            },
        )
    }

    #[tokio::test]
    async fn rate_plan_fetch_returns_not_found_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rateplans/rp_missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpRatePlanFetcher::new(server.uri(), Duration::from_secs(5));
        let ctx = fake_ctx(Uuid::new_v4());
        let result = fetcher.fetch(&ctx, "rp_missing").await;
        assert!(matches!(result, Err(meterbill_types::MeteringError::NotFound(_))));
    }

    #[tokio::test]
    async fn rate_plan_fetch_falls_back_to_list_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rateplans/rp_flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rateplans"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "rate_plan_id": "rp_flaky",
                    "organization_id": "00000000-0000-0000-0000-000000000000",
                    "billing_frequency": "MONTHLY",
                    "billable_metric_id": null,
                    "flat_fee": null,
                    "usage_pricings": [],
                    "tiered_pricings": [],
                    "volume_pricings": [],
                    "stair_step_pricings": [],
                    "setup_fees": [],
                    "freemiums": [],
                    "minimum_commitments": [],
                    "discounts": []
                }
            ])))
            .mount(&server)
            .await;

        let fetcher = HttpRatePlanFetcher::new(server.uri(), Duration::from_secs(5));
        let ctx = fake_ctx(Uuid::new_v4());
        let plan = fetcher.fetch(&ctx, "rp_flaky").await.unwrap();
        assert_eq!(plan.rate_plan_id, "rp_flaky");
    }

    #[tokio::test]
    async fn list_active_subscriptions_returns_empty_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = HttpSubscriptionFetcher::new(server.uri(), Duration::from_secs(5));
        let ctx = fake_ctx(Uuid::new_v4());
        let subscriptions = fetcher.list_active(&ctx, ctx.organization_id).await;
        assert!(subscriptions.is_empty());
    }
}
