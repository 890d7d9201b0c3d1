//! Common test utilities for arkiv-billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use tempfile::TempDir;

use arkiv_billing_core::AccountId;
use arkiv_billing_service::{create_router, AppState, ServiceConfig};
use arkiv_billing_store::RocksStore;

/// Shared secret the harness configures for the sweep trigger.
pub const SWEEP_SECRET: &str = "test-sweep-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct handle to the store, for seeding and asserting records.
    pub store: Arc<RocksStore>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test account ID for authenticated requests.
    pub test_account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and default config.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test harness, letting the caller adjust the config (e.g.
    /// to point the Stripe client at a mock server).
    pub fn with_config(mutate: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            auth_base_url: "http://localhost".into(),
            auth_audience: "arkiv-billing".into(),
            sweep_secret: Some(SWEEP_SECRET.into()),
            stripe_price_basic: Some("price_basic".into()),
            stripe_price_plus: Some("price_plus".into()),
            stripe_price_premium: Some("price_premium".into()),
            ..ServiceConfig::default()
        };
        mutate(&mut config);

        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_account_id = AccountId::generate();

        Self {
            server,
            store,
            _temp_dir: temp_dir,
            test_account_id,
        }
    }

    /// Get the authorization header for the test account.
    pub fn auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_account_id)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
