//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding keys used in column families.

use arkiv_billing_core::AccountId;

/// Create a subscription key from an account ID.
#[must_use]
pub fn subscription_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a customer-reference index key.
///
/// Provider customer references are opaque strings, so the key is the raw
/// reference bytes; the value holds the 16-byte account ID.
#[must_use]
pub fn customer_ref_key(customer_ref: &str) -> Vec<u8> {
    customer_ref.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_key_length() {
        let account_id = AccountId::generate();
        let key = subscription_key(&account_id);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn customer_ref_key_is_raw_bytes() {
        let key = customer_ref_key("cus_abc123");
        assert_eq!(key, b"cus_abc123");
    }
}
