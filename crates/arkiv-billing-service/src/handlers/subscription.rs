//! Subscription management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use arkiv_billing_core::{evaluate_access, AccessDecision, Plan, Subscription};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::reconciler::{self, ToggleOutcome};
use crate::state::AppState;

/// Subscription record view.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Account ID.
    pub account_id: String,
    /// Current plan.
    pub plan: String,
    /// Current status.
    pub status: String,
    /// Derived lifecycle state.
    pub lifecycle_state: String,
    /// Trial end (ISO 8601).
    pub trial_ends_at: Option<String>,
    /// Paid period start (ISO 8601).
    pub current_period_start: Option<String>,
    /// Paid period end (ISO 8601).
    pub current_period_end: Option<String>,
    /// Renewal intent.
    pub auto_renew: bool,
    /// Grace anchor (ISO 8601).
    pub auto_renew_off_at: Option<String>,
    /// Provider cancel-at-period-end mirror.
    pub cancel_at_period_end: bool,
    /// Cancellation instant (ISO 8601).
    pub cancelled_at: Option<String>,
    /// Latest successful payment (ISO 8601).
    pub last_payment_at: Option<String>,
    /// Latest failed payment (ISO 8601).
    pub payment_failed_at: Option<String>,
    /// Latest payment failure reason.
    pub payment_failure_reason: Option<String>,
    /// Current access decision.
    pub access: AccessDecision,
}

impl SubscriptionResponse {
    fn from_record(sub: &Subscription) -> Self {
        let now = Utc::now();
        let fmt = |t: &Option<chrono::DateTime<Utc>>| t.map(|v| v.to_rfc3339());
        Self {
            account_id: sub.account_id.to_string(),
            plan: sub.plan.to_string(),
            status: format!("{:?}", sub.status).to_lowercase(),
            lifecycle_state: format!("{:?}", sub.lifecycle_state(now)),
            trial_ends_at: fmt(&sub.trial_ends_at),
            current_period_start: fmt(&sub.current_period_start),
            current_period_end: fmt(&sub.current_period_end),
            auto_renew: sub.auto_renew,
            auto_renew_off_at: fmt(&sub.auto_renew_off_at),
            cancel_at_period_end: sub.cancel_at_period_end,
            cancelled_at: fmt(&sub.cancelled_at),
            last_payment_at: fmt(&sub.last_payment_at),
            payment_failed_at: fmt(&sub.payment_failed_at),
            payment_failure_reason: sub.payment_failure_reason.clone(),
            access: evaluate_access(Some(sub), now),
        }
    }
}

/// Get the current account's subscription record.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let sub = state
        .store
        .get_by_account(&auth.account_id)?
        .ok_or_else(|| ApiError::NotFound("no subscription found for this account".into()))?;

    Ok(Json(SubscriptionResponse::from_record(&sub)))
}

/// Get the current account's access decision.
///
/// This is the query the rest of the platform asks before allowing write
/// operations. A missing record is a decision, not an error.
pub async fn get_access(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccessDecision>, ApiError> {
    let sub = state.store.get_by_account(&auth.account_id)?;
    Ok(Json(evaluate_access(sub.as_ref(), Utc::now())))
}

/// Auto-renew toggle request.
#[derive(Debug, Deserialize)]
pub struct AutoRenewRequest {
    /// Desired auto-renew value.
    pub auto_renew: bool,
}

/// Set the account's auto-renew intent.
pub async fn set_auto_renew(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<AutoRenewRequest>,
) -> Result<Json<ToggleOutcome>, ApiError> {
    let outcome = reconciler::set_auto_renew(&state, auth.account_id, body.auto_renew).await?;
    Ok(Json(outcome))
}

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Plan to subscribe to (a paid tier).
    pub plan: String,
    /// Redirect target on success.
    pub success_url: Option<String>,
    /// Redirect target on cancel.
    pub cancel_url: Option<String>,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Checkout session ID.
    pub session_id: String,
    /// URL to redirect the user to.
    pub url: Option<String>,
}

/// Create a provider checkout session for a paid plan.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let plan: Plan = body
        .plan
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid plan: {}", body.plan)))?;

    if !plan.is_paid() {
        return Err(ApiError::BadRequest(
            "checkout requires a paid plan".into(),
        ));
    }

    let Some(stripe) = &state.stripe else {
        return Err(ApiError::ExternalService("payments are not configured".into()));
    };

    let price_id = state
        .config
        .price_for_plan(plan)
        .ok_or_else(|| ApiError::Internal(format!("no price configured for plan {plan}")))?
        .to_string();

    // Reuse the existing provider customer, or create one.
    let existing = state.store.get_by_account(&auth.account_id)?;
    let customer_id = match existing.and_then(|s| s.provider_customer_ref) {
        Some(customer_ref) => customer_ref,
        None => {
            let customer = stripe
                .create_customer(&auth.account_id.to_string(), None)
                .await
                .map_err(|e| ApiError::ExternalService(format!("customer creation failed: {e}")))?;
            tracing::info!(
                account_id = %auth.account_id,
                customer_ref = %customer.id,
                "Provider customer created"
            );
            customer.id
        }
    };

    let success_url = body
        .success_url
        .unwrap_or_else(|| format!("{}/account?checkout=success", state.config.frontend_url));
    let cancel_url = body
        .cancel_url
        .unwrap_or_else(|| format!("{}/account?checkout=cancelled", state.config.frontend_url));

    let session = stripe
        .create_subscription_checkout(
            &customer_id,
            &auth.account_id.to_string(),
            &price_id,
            state.config.trial_days,
            &success_url,
            &cancel_url,
        )
        .await
        .map_err(|e| ApiError::ExternalService(format!("checkout creation failed: {e}")))?;

    tracing::info!(
        account_id = %auth.account_id,
        plan = %plan,
        session_id = %session.id,
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Billing-portal request.
#[derive(Debug, Deserialize, Default)]
pub struct PortalRequest {
    /// Redirect target when the user leaves the portal.
    pub return_url: Option<String>,
}

/// Billing-portal response.
#[derive(Debug, Serialize)]
pub struct PortalResponse {
    /// URL to redirect the user to.
    pub url: String,
}

/// Create a provider billing-portal session.
pub async fn create_portal(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PortalRequest>,
) -> Result<Json<PortalResponse>, ApiError> {
    let Some(stripe) = &state.stripe else {
        return Err(ApiError::ExternalService("payments are not configured".into()));
    };

    let sub = state
        .store
        .get_by_account(&auth.account_id)?
        .ok_or_else(|| ApiError::NotFound("no subscription found for this account".into()))?;

    let customer_ref = sub
        .provider_customer_ref
        .ok_or_else(|| ApiError::NotFound("no billing profile for this account".into()))?;

    let return_url = body
        .return_url
        .unwrap_or_else(|| format!("{}/account", state.config.frontend_url));

    let portal = stripe
        .create_portal_session(&customer_ref, &return_url)
        .await
        .map_err(|e| ApiError::ExternalService(format!("portal session failed: {e}")))?;

    Ok(Json(PortalResponse { url: portal.url }))
}

/// Upcoming-invoice preview response.
#[derive(Debug, Serialize)]
pub struct UpcomingInvoiceResponse {
    /// Amount due in cents.
    pub amount_due_cents: i64,
    /// Currency (e.g., "usd").
    pub currency: String,
    /// Next payment attempt (ISO 8601).
    pub next_payment_attempt: Option<String>,
}

/// Preview the account's upcoming invoice.
pub async fn upcoming_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UpcomingInvoiceResponse>, ApiError> {
    let Some(stripe) = &state.stripe else {
        return Err(ApiError::ExternalService("payments are not configured".into()));
    };

    let sub = state
        .store
        .get_by_account(&auth.account_id)?
        .ok_or_else(|| ApiError::NotFound("no subscription found for this account".into()))?;

    let customer_ref = sub
        .provider_customer_ref
        .ok_or_else(|| ApiError::NotFound("no billing profile for this account".into()))?;

    let invoice = stripe
        .get_upcoming_invoice(&customer_ref)
        .await
        .map_err(|e| ApiError::ExternalService(format!("invoice preview failed: {e}")))?
        .ok_or_else(|| ApiError::NotFound("no upcoming invoice".into()))?;

    Ok(Json(UpcomingInvoiceResponse {
        amount_due_cents: invoice.amount_due,
        currency: invoice.currency,
        next_payment_attempt: invoice
            .next_payment_attempt
            .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
            .map(|dt| dt.to_rfc3339()),
    }))
}
