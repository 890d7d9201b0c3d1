//! Lifecycle reconciler.
//!
//! Three independent triggers mutate the subscription record for an
//! account: the user's auto-renew toggle, provider webhook events, and the
//! scheduled cancellation sweep. Each produces one atomic record update
//! through the store; none assumes the value it last wrote is still
//! current, since the triggers race and webhook delivery order is not
//! guaranteed.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use arkiv_billing_core::{
    grace_period, AccountId, Plan, Subscription, SubscriptionStatus, SubscriptionUpdate,
    SweepRunId, GRACE_PERIOD_DAYS,
};

use crate::error::ApiError;
use crate::notify::Notification;
use crate::state::AppState;
use crate::stripe::{CheckoutCompleted, ProviderEvent, SubscriptionState};

// ============================================================================
// Trigger A - auto-renew toggle
// ============================================================================

/// Result of an auto-renew toggle.
#[derive(Debug, Serialize)]
pub struct ToggleOutcome {
    /// The new auto-renew value.
    pub auto_renew: bool,
    /// The grace anchor, when auto-renew was turned off.
    pub auto_renew_off_at: Option<DateTime<Utc>>,
    /// The provider cancel-at-period-end mirror.
    pub cancel_at_period_end: bool,
    /// Human-readable description of what happens next.
    pub message: String,
}

/// Set the account's auto-renew intent (Trigger A).
///
/// Provider call first, DB write second: if the local write fails after
/// the provider accepted the flag change, the two sides disagree until the
/// next webhook or sweep re-derives local state; the failure is surfaced
/// to the caller and logged.
///
/// # Errors
///
/// - `NotFound` if the account has no subscription record.
/// - `Conflict` if the record is terminally cancelled.
/// - `ExternalService` if the provider rejects the flag change.
pub async fn set_auto_renew(
    state: &AppState,
    account_id: AccountId,
    desired: bool,
) -> Result<ToggleOutcome, ApiError> {
    let sub = state
        .store
        .get_by_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound("no subscription found for this account".into()))?;

    if sub.status == SubscriptionStatus::Cancelled {
        return Err(ApiError::Conflict(
            "subscription is cancelled; start a new checkout to resubscribe".into(),
        ));
    }

    let now = Utc::now();

    let (update, anchor) = if desired {
        (
            SubscriptionUpdate {
                auto_renew: Some(true),
                cancel_at_period_end: Some(false),
                auto_renew_off_at: Some(None),
                ..Default::default()
            },
            None,
        )
    } else {
        let anchor = grace_anchor(&sub, now);
        (
            SubscriptionUpdate {
                auto_renew: Some(false),
                cancel_at_period_end: Some(true),
                auto_renew_off_at: Some(Some(anchor)),
                ..Default::default()
            },
            Some(anchor),
        )
    };

    // Provider first: mirror the cancel-at-period-end flag upstream.
    set_provider_cancel_flag(state, &sub, !desired).await?;

    let updated = match state.store.update(&account_id, &update) {
        Ok(updated) => updated,
        Err(e) => {
            tracing::warn!(
                account_id = %account_id,
                desired_auto_renew = %desired,
                error = %e,
                "Provider flag updated but local write failed; records diverge until the next webhook or sweep"
            );
            return Err(e.into());
        }
    };

    let message = if desired {
        "Auto-renew enabled. Your subscription will renew automatically.".to_string()
    } else {
        let anchor = anchor.unwrap_or(now);
        let deadline = anchor + grace_period();
        format!(
            "Auto-renew disabled. Your subscription will be cancelled on {} ({GRACE_PERIOD_DAYS} days after {}) unless you re-enable auto-renew.",
            deadline.format("%Y-%m-%d"),
            anchor.format("%Y-%m-%d"),
        )
    };

    tracing::info!(
        account_id = %account_id,
        auto_renew = %updated.auto_renew,
        auto_renew_off_at = ?updated.auto_renew_off_at,
        "Auto-renew toggled"
    );

    Ok(ToggleOutcome {
        auto_renew: updated.auto_renew,
        auto_renew_off_at: updated.auto_renew_off_at,
        cancel_at_period_end: updated.cancel_at_period_end,
        message,
    })
}

/// Compute the grace-period anchor for a toggle-off at `now`.
fn grace_anchor(sub: &Subscription, now: DateTime<Utc>) -> DateTime<Utc> {
    if sub.trial_open(now) {
        if let Some(trial_end) = sub.trial_ends_at {
            return trial_end;
        }
    }
    if sub.plan.is_paid() && sub.paid_period_open(now) {
        if let Some(period_end) = sub.current_period_end {
            return period_end;
        }
    }
    // Defensive fallback; a record with neither window open should already
    // have lapsed out of reach of the toggle.
    tracing::warn!(
        account_id = %sub.account_id,
        "No open trial or paid period when disabling auto-renew; anchoring grace period at now"
    );
    now
}

/// Mirror the cancel-at-period-end flag to the provider, when both a
/// client and a provider subscription exist.
async fn set_provider_cancel_flag(
    state: &AppState,
    sub: &Subscription,
    cancel: bool,
) -> Result<(), ApiError> {
    let (Some(stripe), Some(sub_ref)) = (&state.stripe, sub.provider_subscription_ref.as_ref())
    else {
        tracing::debug!(
            account_id = %sub.account_id,
            "No provider subscription to update; applying toggle locally only"
        );
        return Ok(());
    };

    stripe
        .set_cancel_at_period_end(sub_ref, cancel)
        .await
        .map(|_| ())
        .map_err(|e| {
            tracing::error!(
                account_id = %sub.account_id,
                error = %e,
                "Provider cancel-at-period-end update failed"
            );
            ApiError::ExternalService(format!("provider update failed: {e}"))
        })
}

// ============================================================================
// Trigger B - provider webhook events
// ============================================================================

/// Apply a decoded provider event (Trigger B).
///
/// Handlers are pure upserts/updates keyed by stable identifiers, so
/// redelivery of the same event reproduces the same end state.
///
/// # Errors
///
/// Returns a retryable error (5xx) on store or provider failure so the
/// provider redelivers. An unknown customer reference is logged and
/// acknowledged instead, to avoid a pointless redelivery storm.
pub async fn apply_provider_event(state: &AppState, event: ProviderEvent) -> Result<(), ApiError> {
    match event {
        ProviderEvent::CheckoutCompleted(checkout) => {
            handle_checkout_completed(state, checkout).await
        }
        ProviderEvent::SubscriptionUpdated(sub_state) => {
            handle_subscription_updated(state, sub_state)
        }
        ProviderEvent::SubscriptionDeleted { customer_ref } => {
            handle_subscription_deleted(state, &customer_ref)
        }
        ProviderEvent::InvoicePaid {
            customer_ref,
            amount_cents,
        } => handle_invoice_paid(state, &customer_ref, amount_cents).await,
        ProviderEvent::InvoicePaymentFailed {
            customer_ref,
            reason,
        } => handle_invoice_payment_failed(state, &customer_ref, reason).await,
        ProviderEvent::Unrecognized { event_type } => {
            tracing::debug!(event_type = %event_type, "Ignoring unrecognized provider event");
            Ok(())
        }
    }
}

async fn handle_checkout_completed(
    state: &AppState,
    checkout: CheckoutCompleted,
) -> Result<(), ApiError> {
    let Ok(account_id) = checkout.account_ref.parse::<AccountId>() else {
        tracing::warn!(
            account_ref = %checkout.account_ref,
            "Checkout completed with unparseable account reference; dropping"
        );
        return Ok(());
    };

    let plan = resolve_plan(state, checkout.price_ref.as_deref());

    // The session does not carry the subscription's trial and period
    // bounds; fetch them when possible. A failed fetch is retryable.
    let mut trial_end = None;
    let mut period_start = None;
    let mut period_end = None;
    if let (Some(stripe), Some(sub_ref)) = (&state.stripe, checkout.subscription_ref.as_ref()) {
        let provider_sub = stripe.get_subscription(sub_ref).await.map_err(|e| {
            ApiError::ExternalService(format!("failed to fetch subscription {sub_ref}: {e}"))
        })?;
        trial_end = provider_sub.trial_end.and_then(|s| DateTime::from_timestamp(s, 0));
        period_start = provider_sub
            .current_period_start
            .and_then(|s| DateTime::from_timestamp(s, 0));
        period_end = provider_sub
            .current_period_end
            .and_then(|s| DateTime::from_timestamp(s, 0));
    }

    let mut record = Subscription::new(account_id, plan);
    record.trial_ends_at = trial_end;
    record.current_period_start = period_start;
    record.current_period_end = period_end;
    record.provider_customer_ref = checkout.customer_ref;
    record.provider_subscription_ref = checkout.subscription_ref;

    // Redelivery of the same session must not look like a new signup.
    if let Some(existing) = state.store.get_by_account(&account_id)? {
        record.created_at = existing.created_at;
    }

    state.store.upsert(&record)?;

    tracing::info!(
        account_id = %account_id,
        plan = %record.plan,
        trial_ends_at = ?record.trial_ends_at,
        "Subscription provisioned from checkout"
    );

    state
        .notifier
        .send(Notification::TrialStarted { account_id })
        .await;

    Ok(())
}

fn handle_subscription_updated(
    state: &AppState,
    sub_state: SubscriptionState,
) -> Result<(), ApiError> {
    let Some(record) = state.store.get_by_customer_ref(&sub_state.customer_ref)? else {
        tracing::warn!(
            customer_ref = %sub_state.customer_ref,
            "Subscription update for unknown customer; dropping"
        );
        return Ok(());
    };

    let status = map_provider_status(&sub_state.status);
    if status.is_none() {
        tracing::warn!(
            customer_ref = %sub_state.customer_ref,
            provider_status = %sub_state.status,
            "Unknown provider subscription status; leaving local status unchanged"
        );
    }

    let update = SubscriptionUpdate {
        plan: sub_state
            .price_ref
            .as_deref()
            .map(|price| resolve_plan(state, Some(price))),
        status,
        trial_ends_at: sub_state.trial_end,
        current_period_start: sub_state.current_period_start.map(Some),
        current_period_end: sub_state.current_period_end.map(Some),
        // The provider's cancellation intent is the source of truth here.
        auto_renew: Some(!sub_state.cancel_at_period_end),
        cancel_at_period_end: Some(sub_state.cancel_at_period_end),
        provider_subscription_ref: Some(sub_state.subscription_ref),
        ..Default::default()
    };

    let updated = state.store.update(&record.account_id, &update)?;

    tracing::info!(
        account_id = %record.account_id,
        status = ?updated.status,
        auto_renew = %updated.auto_renew,
        "Subscription refreshed from provider"
    );

    Ok(())
}

fn handle_subscription_deleted(state: &AppState, customer_ref: &str) -> Result<(), ApiError> {
    let Some(record) = state.store.get_by_customer_ref(customer_ref)? else {
        tracing::warn!(
            customer_ref = %customer_ref,
            "Subscription deletion for unknown customer; dropping"
        );
        return Ok(());
    };

    state.store.update(
        &record.account_id,
        &SubscriptionUpdate {
            status: Some(SubscriptionStatus::Cancelled),
            auto_renew: Some(false),
            ..Default::default()
        },
    )?;

    tracing::info!(account_id = %record.account_id, "Subscription terminally cancelled by provider");

    Ok(())
}

async fn handle_invoice_paid(
    state: &AppState,
    customer_ref: &str,
    amount_cents: i64,
) -> Result<(), ApiError> {
    let Some(record) = state.store.get_by_customer_ref(customer_ref)? else {
        tracing::warn!(
            customer_ref = %customer_ref,
            "Invoice paid for unknown customer; dropping"
        );
        return Ok(());
    };

    let now = Utc::now();
    state.store.update(
        &record.account_id,
        &SubscriptionUpdate {
            status: Some(SubscriptionStatus::Active),
            last_payment_at: Some(now),
            last_payment_amount_cents: Some(amount_cents),
            payment_failed_at: Some(None),
            payment_failure_reason: Some(None),
            ..Default::default()
        },
    )?;

    tracing::info!(
        account_id = %record.account_id,
        amount_cents = %amount_cents,
        "Payment recorded"
    );

    state
        .notifier
        .send(Notification::PaymentSucceeded {
            account_id: record.account_id,
            amount_cents,
        })
        .await;

    Ok(())
}

async fn handle_invoice_payment_failed(
    state: &AppState,
    customer_ref: &str,
    reason: String,
) -> Result<(), ApiError> {
    let Some(record) = state.store.get_by_customer_ref(customer_ref)? else {
        tracing::warn!(
            customer_ref = %customer_ref,
            "Invoice payment failure for unknown customer; dropping"
        );
        return Ok(());
    };

    let now = Utc::now();
    state.store.update(
        &record.account_id,
        &SubscriptionUpdate {
            payment_failed_at: Some(Some(now)),
            payment_failure_reason: Some(Some(reason.clone())),
            ..Default::default()
        },
    )?;

    tracing::warn!(
        account_id = %record.account_id,
        reason = %reason,
        "Payment failure recorded"
    );

    state
        .notifier
        .send(Notification::PaymentFailed {
            account_id: record.account_id,
            reason,
        })
        .await;

    Ok(())
}

/// Map a provider sub-status string to the local status.
fn map_provider_status(provider_status: &str) -> Option<SubscriptionStatus> {
    match provider_status {
        "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Cancelled),
        "past_due" | "unpaid" => Some(SubscriptionStatus::Expired),
        "active" | "trialing" => Some(SubscriptionStatus::Active),
        _ => None,
    }
}

/// Resolve a price reference to a plan, falling back to the lowest paid
/// tier with a warning for manual reconciliation.
fn resolve_plan(state: &AppState, price_ref: Option<&str>) -> Plan {
    match price_ref {
        Some(price) => state.config.plan_for_price(price).unwrap_or_else(|| {
            tracing::warn!(
                price_ref = %price,
                fallback = %Plan::lowest_paid(),
                "Unknown price reference; falling back to lowest paid tier"
            );
            Plan::lowest_paid()
        }),
        None => {
            tracing::warn!(
                fallback = %Plan::lowest_paid(),
                "No price reference on event; falling back to lowest paid tier"
            );
            Plan::lowest_paid()
        }
    }
}

// ============================================================================
// Trigger C - cancellation sweep
// ============================================================================

/// Aggregate report for one sweep run.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    /// Time-ordered identifier for this run.
    pub run_id: SweepRunId,
    /// Candidates examined.
    pub processed: usize,
    /// Candidates cancelled.
    pub cancelled: usize,
    /// Candidates skipped (not yet due, or no longer eligible on re-read).
    pub skipped: usize,
    /// Candidates that failed.
    pub errored: usize,
    /// Per-candidate failure details.
    pub errors: Vec<SweepError>,
}

/// One failed sweep candidate.
#[derive(Debug, Serialize)]
pub struct SweepError {
    /// The affected account.
    pub account_id: AccountId,
    /// What went wrong.
    pub error: String,
}

enum CandidateOutcome {
    Cancelled,
    Skipped,
}

/// Run the cancellation sweep (Trigger C).
///
/// Candidates whose grace period has elapsed are cancelled at the provider
/// and then locally. Per-candidate failures are recorded and do not abort
/// the batch; a slow provider call is bounded by the configured
/// per-candidate timeout and retried on the next run.
///
/// # Errors
///
/// Returns an error only if the candidate selection itself fails.
pub async fn run_cancellation_sweep(state: &AppState) -> Result<SweepReport, ApiError> {
    let run_id = SweepRunId::generate();
    let now = Utc::now();

    let candidates = state.store.list_cancellation_candidates(now, grace_period())?;

    let mut report = SweepReport {
        run_id,
        processed: 0,
        cancelled: 0,
        skipped: 0,
        errored: 0,
        errors: Vec::new(),
    };

    let timeout = StdDuration::from_secs(state.config.sweep_candidate_timeout_seconds);

    for candidate in candidates {
        report.processed += 1;
        let account_id = candidate.account_id;

        match tokio::time::timeout(timeout, cancel_candidate(state, &account_id, now)).await {
            Ok(Ok(CandidateOutcome::Cancelled)) => {
                report.cancelled += 1;
                tracing::info!(run_id = %run_id, account_id = %account_id, "Subscription cancelled by sweep");
            }
            Ok(Ok(CandidateOutcome::Skipped)) => {
                report.skipped += 1;
                tracing::debug!(run_id = %run_id, account_id = %account_id, "Sweep candidate skipped");
            }
            Ok(Err(e)) => {
                report.errored += 1;
                tracing::error!(run_id = %run_id, account_id = %account_id, error = %e, "Sweep candidate failed");
                report.errors.push(SweepError {
                    account_id,
                    error: e.to_string(),
                });
            }
            Err(_) => {
                report.errored += 1;
                tracing::error!(run_id = %run_id, account_id = %account_id, "Sweep candidate timed out");
                report.errors.push(SweepError {
                    account_id,
                    error: format!("timed out after {}s", timeout.as_secs()),
                });
            }
        }
    }

    tracing::info!(
        run_id = %run_id,
        processed = %report.processed,
        cancelled = %report.cancelled,
        skipped = %report.skipped,
        errored = %report.errored,
        "Cancellation sweep complete"
    );

    Ok(report)
}

/// Cancel one sweep candidate, re-reading the record first.
///
/// The row may have changed since selection (a toggle back on, a provider
/// event); the fresh read decides, not the selected snapshot.
async fn cancel_candidate(
    state: &AppState,
    account_id: &AccountId,
    now: DateTime<Utc>,
) -> Result<CandidateOutcome, ApiError> {
    let Some(current) = state.store.get_by_account(account_id)? else {
        return Ok(CandidateOutcome::Skipped);
    };

    if current.auto_renew || current.status != SubscriptionStatus::Active {
        return Ok(CandidateOutcome::Skipped);
    }

    // Defensive double-check against clock skew and selection staleness.
    let due = current.grace_deadline().is_some_and(|deadline| now >= deadline);
    if !due {
        return Ok(CandidateOutcome::Skipped);
    }

    if let (Some(stripe), Some(sub_ref)) = (&state.stripe, current.provider_subscription_ref.as_ref())
    {
        stripe
            .cancel_subscription(sub_ref)
            .await
            .map_err(|e| ApiError::ExternalService(format!("provider cancel failed: {e}")))?;
    }

    state.store.update(
        account_id,
        &SubscriptionUpdate {
            status: Some(SubscriptionStatus::Cancelled),
            auto_renew: Some(false),
            ..Default::default()
        },
    )?;

    Ok(CandidateOutcome::Cancelled)
}
