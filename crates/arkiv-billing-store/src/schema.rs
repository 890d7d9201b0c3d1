//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary subscription records, keyed by `account_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Index: provider customer reference -> `account_id` bytes.
    pub const SUBSCRIPTIONS_BY_CUSTOMER: &str = "subscriptions_by_customer";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::SUBSCRIPTIONS, cf::SUBSCRIPTIONS_BY_CUSTOMER]
}
