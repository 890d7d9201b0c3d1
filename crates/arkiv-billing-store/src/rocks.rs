//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use arkiv_billing_core::{AccountId, Subscription, SubscriptionStatus, SubscriptionUpdate};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// Number of row-lock stripes. Updates to one account always hash to the
/// same stripe, serializing read-modify-write cycles for that row.
const LOCK_STRIPES: usize = 16;

/// How far ahead of strictly-due the candidate scan reaches. One sweep
/// interval; the sweep's own re-verification is authoritative.
const SELECTION_MARGIN_DAYS: i64 = 1;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    row_locks: Vec<Mutex<()>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row_locks = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self {
            db: Arc::new(db),
            row_locks,
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Acquire the lock stripe for an account's row.
    fn row_lock(&self, account_id: &AccountId) -> MutexGuard<'_, ()> {
        let stripe = account_id.as_bytes()[0] as usize % LOCK_STRIPES;
        // A poisoned stripe means another writer panicked mid-update; the
        // batch it was building was never written, so the data is intact.
        self.row_locks[stripe]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a record without taking the row lock.
    fn read_record(&self, account_id: &AccountId) -> Result<Option<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let key = keys::subscription_key(account_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Write a record and reconcile the customer-reference index in one
    /// batch. `previous_ref` is the reference the old record carried, if
    /// any, so a changed reference drops its stale index entry.
    fn write_record(
        &self,
        subscription: &Subscription,
        previous_ref: Option<&str>,
    ) -> Result<()> {
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_index = self.cf(cf::SUBSCRIPTIONS_BY_CUSTOMER)?;

        let key = keys::subscription_key(&subscription.account_id);
        let value = Self::serialize(subscription)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_subs, &key, &value);

        let current_ref = subscription.provider_customer_ref.as_deref();
        if let Some(old) = previous_ref {
            if current_ref != Some(old) {
                batch.delete_cf(&cf_index, keys::customer_ref_key(old));
            }
        }
        if let Some(customer_ref) = current_ref {
            batch.put_cf(
                &cf_index,
                keys::customer_ref_key(customer_ref),
                subscription.account_id.as_bytes(),
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    fn upsert(&self, subscription: &Subscription) -> Result<()> {
        let _guard = self.row_lock(&subscription.account_id);

        let previous = self.read_record(&subscription.account_id)?;

        let mut record = subscription.clone();
        record.updated_at = Utc::now();

        self.write_record(
            &record,
            previous
                .as_ref()
                .and_then(|p| p.provider_customer_ref.as_deref()),
        )
    }

    fn get_by_account(&self, account_id: &AccountId) -> Result<Option<Subscription>> {
        self.read_record(account_id)
    }

    fn get_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Subscription>> {
        let cf_index = self.cf(cf::SUBSCRIPTIONS_BY_CUSTOMER)?;
        let key = keys::customer_ref_key(customer_ref);

        let Some(account_bytes) = self
            .db
            .get_cf(&cf_index, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let account_id = uuid::Uuid::from_slice(&account_bytes)
            .map(AccountId::from_uuid)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.read_record(&account_id)
    }

    fn update(&self, account_id: &AccountId, update: &SubscriptionUpdate) -> Result<Subscription> {
        let _guard = self.row_lock(account_id);

        let mut record = self.read_record(account_id)?.ok_or(StoreError::NotFound)?;
        let previous_ref = record.provider_customer_ref.clone();

        update.apply(&mut record, Utc::now());

        self.write_record(&record, previous_ref.as_deref())?;

        Ok(record)
    }

    fn list_cancellation_candidates(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Vec<Subscription>> {
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cutoff = now - grace + Duration::days(SELECTION_MARGIN_DAYS);

        let mut candidates = Vec::new();
        for item in self.db.iterator_cf(&cf_subs, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let sub: Subscription = Self::deserialize(&value)?;

            let selectable = !sub.auto_renew
                && sub.status == SubscriptionStatus::Active
                && sub.auto_renew_off_at.is_some_and(|anchor| anchor <= cutoff);

            if selectable {
                candidates.push(sub);
            }
        }

        tracing::debug!(
            candidates = candidates.len(),
            cutoff = %cutoff,
            "Cancellation candidate scan complete"
        );

        Ok(candidates)
    }
}
