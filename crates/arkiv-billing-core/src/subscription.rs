//! Subscription record types for arkiv-billing.
//!
//! This module defines the persisted subscription state for one account,
//! the plan/status enums, and the partial-update type every write path
//! goes through.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::AccountId;

// ============================================================================
// Constants
// ============================================================================

/// Grace period after the auto-renew anchor before a subscription is
/// irreversibly cancelled, in days.
pub const GRACE_PERIOD_DAYS: i64 = 2;

/// Basic plan monthly price in cents ($9).
pub const BASIC_PLAN_PRICE_CENTS: i64 = 900;

/// Plus plan monthly price in cents ($19).
pub const PLUS_PLAN_PRICE_CENTS: i64 = 1900;

/// Premium plan monthly price in cents ($39).
pub const PREMIUM_PLAN_PRICE_CENTS: i64 = 3900;

/// The fixed grace period as a duration.
#[must_use]
pub fn grace_period() -> Duration {
    Duration::days(GRACE_PERIOD_DAYS)
}

// ============================================================================
// Subscription record
// ============================================================================

/// The persisted subscription state for one account.
///
/// Exactly one record exists per account (upsert keyed on `account_id`).
/// The record is mutated by the auto-renew toggle, provider webhook events,
/// and the cancellation sweep; it is never hard-deleted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// The owning account (from the identity provider).
    pub account_id: AccountId,

    /// Semantic billing tier, independent of status.
    pub plan: Plan,

    /// Coarse lifecycle state reported to the rest of the system.
    pub status: SubscriptionStatus,

    /// End of the trial window. Set once at creation, never rewritten.
    pub trial_ends_at: Option<DateTime<Utc>>,

    /// Start of the paid billing period (provider-driven).
    pub current_period_start: Option<DateTime<Utc>>,

    /// End of the paid billing period (provider-driven).
    pub current_period_end: Option<DateTime<Utc>>,

    /// User-controlled renewal intent, decoupled from `status`.
    pub auto_renew: bool,

    /// Grace-period anchor. Non-null only while `auto_renew` is false and
    /// the record is not yet cancelled.
    pub auto_renew_off_at: Option<DateTime<Utc>>,

    /// Mirror of the provider's cancel-at-period-end flag.
    pub cancel_at_period_end: bool,

    /// When the subscription was terminally cancelled. Set once.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Opaque provider customer identifier.
    pub provider_customer_ref: Option<String>,

    /// Opaque provider subscription identifier.
    pub provider_subscription_ref: Option<String>,

    /// When the latest successful payment landed.
    pub last_payment_at: Option<DateTime<Utc>>,

    /// Amount of the latest successful payment, in cents.
    pub last_payment_amount_cents: Option<i64>,

    /// When the latest payment attempt failed. Cleared on the next
    /// successful payment.
    pub payment_failed_at: Option<DateTime<Utc>>,

    /// Provider-reported reason for the latest payment failure.
    pub payment_failure_reason: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a new active subscription record for an account.
    #[must_use]
    pub fn new(account_id: AccountId, plan: Plan) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            plan,
            status: SubscriptionStatus::Active,
            trial_ends_at: None,
            current_period_start: None,
            current_period_end: None,
            auto_renew: true,
            auto_renew_off_at: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            provider_customer_ref: None,
            provider_subscription_ref: None,
            last_payment_at: None,
            last_payment_amount_cents: None,
            payment_failed_at: None,
            payment_failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the trial window is still open at `now`.
    #[must_use]
    pub fn trial_open(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.is_some_and(|end| now < end)
    }

    /// Whether the paid billing period is still open at `now`.
    #[must_use]
    pub fn paid_period_open(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end.is_some_and(|end| now < end)
    }

    /// The instant after which the cancellation sweep may terminate this
    /// subscription, if auto-renew has been turned off.
    #[must_use]
    pub fn grace_deadline(&self) -> Option<DateTime<Utc>> {
        self.auto_renew_off_at.map(|anchor| anchor + grace_period())
    }

    /// Derive the lifecycle state at `now`. The state is computed, never
    /// stored.
    #[must_use]
    pub fn lifecycle_state(&self, now: DateTime<Utc>) -> LifecycleState {
        if self.status == SubscriptionStatus::Cancelled {
            return LifecycleState::Cancelled;
        }
        if self.trial_open(now) {
            return LifecycleState::TrialActive;
        }
        if self.status == SubscriptionStatus::Active
            && (self.paid_period_open(now)
                || (self.plan.is_paid() && self.current_period_end.is_none()))
        {
            return LifecycleState::PaidActive;
        }
        LifecycleState::GracePeriod
    }
}

/// Derived lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Trial window is open.
    TrialActive,

    /// Paid period is open (or provisioned and not yet reported).
    PaidActive,

    /// Trial and paid period both elapsed; cancellation pending unless
    /// auto-renew is re-enabled.
    GracePeriod,

    /// Terminally cancelled.
    Cancelled,
}

/// Available billing plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Trial tier: full access while the trial window is open.
    Trial,

    /// Basic plan: $9/month, personal archive.
    Basic,

    /// Plus plan: $19/month, shared archives and larger quota.
    Plus,

    /// Premium plan: $39/month, organization features.
    Premium,
}

impl Plan {
    /// Whether this is a paid tier.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Trial)
    }

    /// Get the monthly price in cents.
    #[must_use]
    pub const fn monthly_price_cents(&self) -> i64 {
        match self {
            Self::Trial => 0,
            Self::Basic => BASIC_PLAN_PRICE_CENTS,
            Self::Plus => PLUS_PLAN_PRICE_CENTS,
            Self::Premium => PREMIUM_PLAN_PRICE_CENTS,
        }
    }

    /// The lowest paid tier, used as the fallback when a provider price
    /// reference cannot be mapped.
    #[must_use]
    pub const fn lowest_paid() -> Self {
        Self::Basic
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trial => "trial",
            Self::Basic => "basic",
            Self::Plus => "plus",
            Self::Premium => "premium",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "basic" => Ok(Self::Basic),
            "plus" => Ok(Self::Plus),
            "premium" => Ok(Self::Premium),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown plan name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active.
    Active,

    /// Payment lapsed; access decided by the policy evaluator.
    Expired,

    /// Terminally cancelled. No transition back through updates.
    Cancelled,
}

// ============================================================================
// Partial updates
// ============================================================================

/// A partial update to a subscription record.
///
/// `None` leaves a field untouched. Clearable optional fields use a nested
/// `Option`: `Some(None)` clears, `Some(Some(v))` sets.
///
/// [`SubscriptionUpdate::apply`] is the single place the record invariants
/// are enforced, so the toggle, webhook, and sweep paths all inherit them.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    /// New plan.
    pub plan: Option<Plan>,
    /// New status. A transition away from `Cancelled` is ignored.
    pub status: Option<SubscriptionStatus>,
    /// Trial end. Applied only if the record has none (write-once).
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Paid period start.
    pub current_period_start: Option<Option<DateTime<Utc>>>,
    /// Paid period end.
    pub current_period_end: Option<Option<DateTime<Utc>>>,
    /// Renewal intent.
    pub auto_renew: Option<bool>,
    /// Grace anchor.
    pub auto_renew_off_at: Option<Option<DateTime<Utc>>>,
    /// Provider cancel-at-period-end mirror.
    pub cancel_at_period_end: Option<bool>,
    /// Cancellation instant. Applied only once.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Provider customer reference.
    pub provider_customer_ref: Option<String>,
    /// Provider subscription reference.
    pub provider_subscription_ref: Option<String>,
    /// Latest successful payment instant.
    pub last_payment_at: Option<DateTime<Utc>>,
    /// Latest successful payment amount in cents.
    pub last_payment_amount_cents: Option<i64>,
    /// Latest failed payment instant.
    pub payment_failed_at: Option<Option<DateTime<Utc>>>,
    /// Latest payment failure reason.
    pub payment_failure_reason: Option<Option<String>>,
}

impl SubscriptionUpdate {
    /// Apply this update to a record, refreshing `updated_at` and
    /// normalizing the record invariants.
    ///
    /// Once a record is cancelled only the payment-observability fields and
    /// provider references still apply; lifecycle fields are frozen. A new
    /// checkout replaces the record wholesale via upsert instead.
    pub fn apply(&self, sub: &mut Subscription, now: DateTime<Utc>) {
        let terminal = sub.status == SubscriptionStatus::Cancelled;

        if !terminal {
            if let Some(plan) = self.plan {
                sub.plan = plan;
            }
            if let Some(status) = self.status {
                sub.status = status;
                if status == SubscriptionStatus::Cancelled && sub.cancelled_at.is_none() {
                    sub.cancelled_at = Some(self.cancelled_at.unwrap_or(now));
                }
            }
            if sub.trial_ends_at.is_none() {
                if let Some(trial_end) = self.trial_ends_at {
                    sub.trial_ends_at = Some(trial_end);
                }
            }
            if let Some(start) = self.current_period_start {
                sub.current_period_start = start;
            }
            if let Some(end) = self.current_period_end {
                sub.current_period_end = end;
            }
            if let Some(auto_renew) = self.auto_renew {
                sub.auto_renew = auto_renew;
            }
            if let Some(anchor) = self.auto_renew_off_at {
                sub.auto_renew_off_at = anchor;
            }
            if let Some(cape) = self.cancel_at_period_end {
                sub.cancel_at_period_end = cape;
            }
        }

        if let Some(ref customer) = self.provider_customer_ref {
            sub.provider_customer_ref = Some(customer.clone());
        }
        if let Some(ref subscription) = self.provider_subscription_ref {
            sub.provider_subscription_ref = Some(subscription.clone());
        }
        if let Some(paid_at) = self.last_payment_at {
            sub.last_payment_at = Some(paid_at);
        }
        if let Some(amount) = self.last_payment_amount_cents {
            sub.last_payment_amount_cents = Some(amount);
        }
        if let Some(failed_at) = self.payment_failed_at {
            sub.payment_failed_at = failed_at;
        }
        if let Some(ref reason) = self.payment_failure_reason {
            sub.payment_failure_reason = reason.clone();
        }

        // Invariant: the grace anchor exists only while auto-renew is off
        // and the record is not cancelled.
        if sub.auto_renew || sub.status == SubscriptionStatus::Cancelled {
            sub.auto_renew_off_at = None;
        }

        sub.updated_at = now;
    }
}
