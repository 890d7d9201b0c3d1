//! Access policy evaluation.
//!
//! A single pure function derives the account's current capability from a
//! subscription record and the current time. Every call site needing a
//! yes/no decision goes through [`evaluate_access`] instead of re-deriving
//! it locally.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::subscription::{Subscription, SubscriptionStatus};

/// The outcome of an access-policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    /// Whether the account may perform write operations right now.
    pub can_perform: bool,

    /// Whether the underlying subscription status is `active`.
    pub is_active: bool,

    /// Optional user-facing notice explaining or qualifying the decision.
    pub warning: Option<String>,
}

/// Derive the current capability set from a subscription record and `now`.
///
/// First matching rule wins:
///
/// 1. no record, or a terminally cancelled record;
/// 2. trial window open;
/// 3. paid period open and status active;
/// 4. active paid plan with no reported period yet;
/// 5. everything elapsed: grace-period reinstatement while auto-renew is
///    on, denial otherwise.
///
/// Deterministic and side-effect-free.
#[must_use]
pub fn evaluate_access(subscription: Option<&Subscription>, now: DateTime<Utc>) -> AccessDecision {
    let Some(sub) = subscription else {
        return AccessDecision {
            can_perform: false,
            is_active: false,
            warning: Some("No subscription found. Subscribe to gain access.".to_string()),
        };
    };

    let is_active = sub.status == SubscriptionStatus::Active;

    // Cancelled is terminal: denied regardless of any other field, even a
    // trial or paid period that has not elapsed yet.
    if sub.status == SubscriptionStatus::Cancelled {
        return AccessDecision {
            can_perform: false,
            is_active: false,
            warning: Some(
                "Your subscription was cancelled. Resubscribe to regain access.".to_string(),
            ),
        };
    }

    // Rule 2: open trial grants access regardless of auto-renew.
    if sub.trial_open(now) {
        let warning = if sub.auto_renew {
            None
        } else {
            sub.trial_ends_at.map(|end| {
                format!(
                    "Auto-renew is off. Your access ends when the trial expires on {} unless you re-enable it.",
                    end.format("%Y-%m-%d")
                )
            })
        };
        return AccessDecision {
            can_perform: true,
            is_active,
            warning,
        };
    }

    // Rule 3: open paid period.
    if is_active && sub.paid_period_open(now) {
        let warning = if sub.auto_renew {
            None
        } else {
            sub.current_period_end.map(|end| {
                format!(
                    "Auto-renew is off. Your access ends on {} unless you re-enable it.",
                    end.format("%Y-%m-%d")
                )
            })
        };
        return AccessDecision {
            can_perform: true,
            is_active,
            warning,
        };
    }

    // Rule 4: provisioned paid plan, provider has not reported a period yet.
    if is_active && sub.plan.is_paid() && sub.current_period_end.is_none() {
        let warning = (!sub.auto_renew).then(|| {
            "Auto-renew is off. Your access ends at the close of the current billing period unless you re-enable it.".to_string()
        });
        return AccessDecision {
            can_perform: true,
            is_active,
            warning,
        };
    }

    // Rule 5: trial and paid period both elapsed.
    if is_active && sub.auto_renew {
        return AccessDecision {
            can_perform: true,
            is_active,
            warning: Some(
                "Access restored because auto-renew is on; your subscription will renew.".to_string(),
            ),
        };
    }

    AccessDecision {
        can_perform: false,
        is_active,
        warning: Some(
            "Your subscription has lapsed. Re-enable auto-renew or resubscribe to regain access."
                .to_string(),
        ),
    }
}
