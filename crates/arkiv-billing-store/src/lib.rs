//! `RocksDB` storage layer for arkiv-billing.
//!
//! This crate provides persistent storage for subscription records using
//! `RocksDB` with column families for the customer-reference index.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `subscriptions`: Primary subscription records, keyed by `account_id`
//! - `subscriptions_by_customer`: Index from provider customer reference to
//!   `account_id`
//!
//! No business logic lives here; the store exists to give the reconciler
//! and the access evaluator a testable seam independent of the datastore.
//!
//! # Example
//!
//! ```no_run
//! use arkiv_billing_store::{RocksStore, Store};
//! use arkiv_billing_core::{AccountId, Plan, Subscription};
//!
//! let store = RocksStore::open("/tmp/arkiv-billing-db").unwrap();
//!
//! let account_id = AccountId::generate();
//! let sub = Subscription::new(account_id, Plan::Basic);
//! store.upsert(&sub).unwrap();
//!
//! let retrieved = store.get_by_account(&account_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Duration, Utc};

use arkiv_billing_core::{AccountId, Subscription, SubscriptionUpdate};

/// The storage trait defining all subscription record operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations behind the reconciler and evaluator.
pub trait Store: Send + Sync {
    /// Insert or replace the subscription record for an account.
    ///
    /// Maintains the customer-reference index and refreshes `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert(&self, subscription: &Subscription) -> Result<()>;

    /// Get the subscription record for an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_by_account(&self, account_id: &AccountId) -> Result<Option<Subscription>>;

    /// Get the subscription record owning a provider customer reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Subscription>>;

    /// Apply a partial update to an account's record, serialized against
    /// concurrent updates to the same row.
    ///
    /// Re-reads the current record under a per-account lock before applying,
    /// so a toggle and a webhook racing on the same account cannot lose
    /// updates. Returns the record as written.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account has no record.
    fn update(&self, account_id: &AccountId, update: &SubscriptionUpdate) -> Result<Subscription>;

    /// List subscriptions eligible for the cancellation sweep at `now`.
    ///
    /// Selects records with `auto_renew == false`, `status == active`, and
    /// an `auto_renew_off_at` older than `grace` minus a one-day selection
    /// margin. The sweep re-verifies each candidate before acting, so the
    /// margin only widens the candidate set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_cancellation_candidates(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Vec<Subscription>>;
}
