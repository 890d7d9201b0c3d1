//! Core types and logic for arkiv-billing.
//!
//! This crate provides the foundational types used throughout the arkiv
//! billing platform:
//!
//! - **Identifiers**: `AccountId`, `SweepRunId`
//! - **Subscriptions**: `Subscription`, `Plan`, `SubscriptionStatus`,
//!   `SubscriptionUpdate`
//! - **Access policy**: `evaluate_access`, `AccessDecision`
//!
//! All logic here is pure: no I/O, no clocks. Callers pass `now` in, which
//! keeps the lifecycle rules exhaustively testable against synthetic
//! timestamps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod ids;
pub mod subscription;

pub use access::{evaluate_access, AccessDecision};
pub use ids::{AccountId, IdError, SweepRunId};
pub use subscription::{
    grace_period, LifecycleState, Plan, Subscription, SubscriptionStatus, SubscriptionUpdate,
    UnknownPlan, BASIC_PLAN_PRICE_CENTS, GRACE_PERIOD_DAYS, PLUS_PLAN_PRICE_CENTS,
    PREMIUM_PLAN_PRICE_CENTS,
};
