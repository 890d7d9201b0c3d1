//! Subscription lifecycle integration tests.
//!
//! Covers the auto-renew toggle, webhook-driven reconciliation, and the
//! access query, against a real store and (where provider calls are
//! needed) a mocked Stripe API.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::TestHarness;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arkiv_billing_core::{Plan, Subscription, SubscriptionStatus};
use arkiv_billing_store::Store;

fn parse_ts(value: &serde_json::Value) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value.as_str().expect("timestamp string"))
        .expect("valid RFC 3339")
        .with_timezone(&Utc)
}

/// Seed a trial subscription ending `days` from now.
fn seed_trial(harness: &TestHarness, days: i64) -> Subscription {
    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() + Duration::days(days));
    harness.store.upsert(&sub).unwrap();
    harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap()
}

// ============================================================================
// Access query
// ============================================================================

#[tokio::test]
async fn access_without_record_denies() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/subscription/access")
        .add_header("authorization", harness.auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["can_perform"], false);
    assert!(body["warning"].as_str().unwrap().contains("Subscribe"));
}

#[tokio::test]
async fn access_during_trial_without_auto_renew_warns() {
    let harness = TestHarness::new();
    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() + Duration::days(5));
    sub.auto_renew = false;
    harness.store.upsert(&sub).unwrap();

    let response = harness
        .server
        .get("/v1/subscription/access")
        .add_header("authorization", harness.auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["can_perform"], true);
    let expected_date = sub.trial_ends_at.unwrap().format("%Y-%m-%d").to_string();
    assert!(body["warning"].as_str().unwrap().contains(&expected_date));
}

#[tokio::test]
async fn access_requires_authentication() {
    let harness = TestHarness::new();
    let response = harness.server.get("/v1/subscription/access").await;
    response.assert_status_unauthorized();
}

// ============================================================================
// Trigger A - auto-renew toggle
// ============================================================================

#[tokio::test]
async fn toggle_off_during_trial_anchors_at_trial_end() {
    let harness = TestHarness::new();
    let seeded = seed_trial(&harness, 5);

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["auto_renew"], false);
    assert_eq!(body["cancel_at_period_end"], true);

    // The anchor is the trial end, not now.
    let anchor = parse_ts(&body["auto_renew_off_at"]);
    assert_eq!(anchor, seeded.trial_ends_at.unwrap());

    // The message names the 2-day window.
    assert!(body["message"].as_str().unwrap().contains("2 days"));

    let stored = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert!(!stored.auto_renew);
    assert_eq!(stored.auto_renew_off_at, seeded.trial_ends_at);
}

#[tokio::test]
async fn toggle_off_during_paid_period_anchors_at_period_end() {
    let harness = TestHarness::new();
    let period_end = Utc::now() + Duration::days(20);
    let mut sub = Subscription::new(harness.test_account_id, Plan::Plus);
    sub.trial_ends_at = Some(Utc::now() - Duration::days(10));
    sub.current_period_start = Some(Utc::now() - Duration::days(10));
    sub.current_period_end = Some(period_end);
    harness.store.upsert(&sub).unwrap();

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(parse_ts(&body["auto_renew_off_at"]), period_end);
}

#[tokio::test]
async fn toggle_roundtrip_restores_state() {
    let harness = TestHarness::new();
    seed_trial(&harness, 5);

    harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": true }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["auto_renew"], true);
    assert_eq!(body["cancel_at_period_end"], false);
    assert!(body["auto_renew_off_at"].is_null());

    let stored = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert!(stored.auto_renew);
    assert!(stored.auto_renew_off_at.is_none());
    assert!(!stored.cancel_at_period_end);
    assert_eq!(stored.plan, Plan::Basic);
    assert_eq!(stored.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn toggle_without_record_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn toggle_on_cancelled_record_conflicts() {
    let harness = TestHarness::new();
    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.status = SubscriptionStatus::Cancelled;
    sub.cancelled_at = Some(Utc::now());
    harness.store.upsert(&sub).unwrap();

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": true }))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn toggle_mirrors_flag_to_provider() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscriptions/sub_42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_42",
            "customer": "cus_42",
            "status": "trialing",
            "cancel_at_period_end": true
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let harness = TestHarness::with_config(|config| {
        config.stripe_api_key = Some("sk_test_xxx".into());
        config.stripe_base_url = mock.uri();
    });

    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() + Duration::days(5));
    sub.provider_subscription_ref = Some("sub_42".into());
    harness.store.upsert(&sub).unwrap();

    harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn toggle_provider_failure_leaves_record_unchanged() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscriptions/sub_err"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let harness = TestHarness::with_config(|config| {
        config.stripe_api_key = Some("sk_test_xxx".into());
        config.stripe_base_url = mock.uri();
    });

    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() + Duration::days(5));
    sub.provider_subscription_ref = Some("sub_err".into());
    harness.store.upsert(&sub).unwrap();

    let response = harness
        .server
        .post("/v1/subscription/auto-renew")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "auto_renew": false }))
        .await;

    // Provider call first: the failure surfaces and nothing was written.
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);

    let stored = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert!(stored.auto_renew);
    assert!(stored.auto_renew_off_at.is_none());
}

// ============================================================================
// Trigger B - webhooks
// ============================================================================

fn webhook_body(event_type: &str, object: serde_json::Value) -> String {
    json!({
        "id": "evt_test",
        "type": event_type,
        "data": { "object": object }
    })
    .to_string()
}

#[tokio::test]
async fn checkout_completed_provisions_subscription() {
    let trial_end = Utc::now() + Duration::days(14);
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_new",
            "customer": "cus_new",
            "status": "trialing",
            "cancel_at_period_end": false,
            "trial_end": trial_end.timestamp()
        })))
        .mount(&mock)
        .await;

    let harness = TestHarness::with_config(|config| {
        config.stripe_api_key = Some("sk_test_xxx".into());
        config.stripe_base_url = mock.uri();
    });
    let account_id = harness.test_account_id;

    let body = webhook_body(
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "client_reference_id": account_id.to_string(),
            "customer": "cus_new",
            "subscription": "sub_new",
            "metadata": { "price_id": "price_plus" }
        }),
    );

    harness
        .server
        .post("/webhooks/stripe")
        .text(body.clone())
        .await
        .assert_status_ok();

    let stored = harness.store.get_by_account(&account_id).unwrap().unwrap();
    assert_eq!(stored.plan, Plan::Plus);
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert!(stored.auto_renew);
    assert_eq!(stored.provider_customer_ref.as_deref(), Some("cus_new"));
    assert_eq!(stored.provider_subscription_ref.as_deref(), Some("sub_new"));
    assert_eq!(
        stored.trial_ends_at.map(|t| t.timestamp()),
        Some(trial_end.timestamp())
    );

    // Redelivery reproduces the same end state.
    harness
        .server
        .post("/webhooks/stripe")
        .text(body)
        .await
        .assert_status_ok();

    let redelivered = harness.store.get_by_account(&account_id).unwrap().unwrap();
    assert_eq!(redelivered.plan, stored.plan);
    assert_eq!(redelivered.status, stored.status);
    assert_eq!(redelivered.auto_renew, stored.auto_renew);
    assert_eq!(redelivered.trial_ends_at, stored.trial_ends_at);
    assert_eq!(redelivered.created_at, stored.created_at);
    assert_eq!(
        redelivered.provider_subscription_ref,
        stored.provider_subscription_ref
    );
}

#[tokio::test]
async fn checkout_with_unknown_price_falls_back_to_lowest_paid_tier() {
    let harness = TestHarness::new();
    let account_id = harness.test_account_id;

    // No Stripe client configured: the bounds fetch is skipped.
    let body = webhook_body(
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "client_reference_id": account_id.to_string(),
            "customer": "cus_x",
            "metadata": { "price_id": "price_does_not_exist" }
        }),
    );

    harness
        .server
        .post("/webhooks/stripe")
        .text(body)
        .await
        .assert_status_ok();

    let stored = harness.store.get_by_account(&account_id).unwrap().unwrap();
    assert_eq!(stored.plan, Plan::Basic);
}

#[tokio::test]
async fn subscription_updated_refreshes_record() {
    let harness = TestHarness::new();
    let period_start = Utc::now();
    let period_end = Utc::now() + Duration::days(30);

    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() - Duration::days(1));
    sub.provider_customer_ref = Some("cus_1".into());
    harness.store.upsert(&sub).unwrap();

    let body = webhook_body(
        "customer.subscription.updated",
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "cancel_at_period_end": true,
            "current_period_start": period_start.timestamp(),
            "current_period_end": period_end.timestamp(),
            "items": { "data": [ { "price": { "id": "price_premium" } } ] }
        }),
    );

    harness
        .server
        .post("/webhooks/stripe")
        .text(body)
        .await
        .assert_status_ok();

    let stored = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.plan, Plan::Premium);
    assert_eq!(stored.status, SubscriptionStatus::Active);
    // The provider's cancellation intent is the source of truth here.
    assert!(!stored.auto_renew);
    assert!(stored.cancel_at_period_end);
    assert_eq!(
        stored.current_period_end.map(|t| t.timestamp()),
        Some(period_end.timestamp())
    );
    assert_eq!(stored.provider_subscription_ref.as_deref(), Some("sub_1"));
}

#[tokio::test]
async fn payment_failed_then_paid_clears_failure() {
    let harness = TestHarness::new();
    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.provider_customer_ref = Some("cus_1".into());
    harness.store.upsert(&sub).unwrap();

    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body(
            "invoice.payment_failed",
            json!({
                "id": "in_1",
                "customer": "cus_1",
                "last_payment_error": { "message": "card_declined" }
            }),
        ))
        .await
        .assert_status_ok();

    let failed = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert!(failed.payment_failed_at.is_some());
    assert_eq!(failed.payment_failure_reason.as_deref(), Some("card_declined"));
    // A failure alone does not change status.
    assert_eq!(failed.status, SubscriptionStatus::Active);

    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body(
            "invoice.paid",
            json!({ "id": "in_2", "customer": "cus_1", "amount_paid": 900 }),
        ))
        .await
        .assert_status_ok();

    let paid = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert!(paid.payment_failed_at.is_none());
    assert!(paid.payment_failure_reason.is_none());
    assert_eq!(paid.status, SubscriptionStatus::Active);
    assert!(paid.last_payment_at.is_some());
    assert_eq!(paid.last_payment_amount_cents, Some(900));
}

#[tokio::test]
async fn subscription_deleted_is_terminal() {
    let harness = TestHarness::new();

    // A record mid-grace-period: auto-renew off, anchor set.
    let mut sub = Subscription::new(harness.test_account_id, Plan::Basic);
    sub.trial_ends_at = Some(Utc::now() - Duration::days(1));
    sub.auto_renew = false;
    sub.auto_renew_off_at = Some(Utc::now() - Duration::days(1));
    sub.provider_customer_ref = Some("cus_1".into());
    harness.store.upsert(&sub).unwrap();

    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body(
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "canceled" }),
        ))
        .await
        .assert_status_ok();

    let stored = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);
    assert!(stored.cancelled_at.is_some());
    assert!(!stored.auto_renew);
    assert!(stored.auto_renew_off_at.is_none());

    // A stale "active" update delivered after deletion must not resurrect.
    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "cancel_at_period_end": false
            }),
        ))
        .await
        .assert_status_ok();

    let after = harness
        .store
        .get_by_account(&harness.test_account_id)
        .unwrap()
        .unwrap();
    assert_eq!(after.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn webhook_for_unknown_customer_is_acknowledged() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body(
            "invoice.paid",
            json!({ "id": "in_1", "customer": "cus_unknown", "amount_paid": 900 }),
        ))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/webhooks/stripe")
        .text(webhook_body("customer.created", json!({ "id": "cus_1" })))
        .await
        .assert_status_ok();
}

// ============================================================================
// Record view
// ============================================================================

#[tokio::test]
async fn subscription_view_includes_access_decision() {
    let harness = TestHarness::new();
    seed_trial(&harness, 5);

    let response = harness
        .server
        .get("/v1/subscription")
        .add_header("authorization", harness.auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "basic");
    assert_eq!(body["status"], "active");
    assert_eq!(body["lifecycle_state"], "TrialActive");
    assert_eq!(body["access"]["can_perform"], true);
}
