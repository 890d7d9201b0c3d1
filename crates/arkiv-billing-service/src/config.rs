//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use arkiv_billing_core::Plan;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/arkiv-billing").
    pub data_dir: String,

    /// JWT validation base URL (default: `<https://id.arkiv.app>`).
    pub auth_base_url: String,

    /// Expected JWT audience (default: "arkiv-billing").
    pub auth_audience: String,

    /// Shared secret for the scheduled cancellation sweep trigger.
    pub sweep_secret: Option<String>,

    /// Per-candidate timeout for sweep provider calls, in seconds.
    pub sweep_candidate_timeout_seconds: u64,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL (overridable for testing).
    pub stripe_base_url: String,

    /// Stripe price ID for the basic plan.
    pub stripe_price_basic: Option<String>,

    /// Stripe price ID for the plus plan.
    pub stripe_price_plus: Option<String>,

    /// Stripe price ID for the premium plan.
    pub stripe_price_premium: Option<String>,

    /// Trial length offered on new checkouts, in days.
    pub trial_days: u32,

    /// Notification endpoint URL (optional; notifications log-only without it).
    pub notification_url: Option<String>,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/arkiv-billing".into()),
            auth_base_url: std::env::var("AUTH_BASE_URL")
                .unwrap_or_else(|_| "https://id.arkiv.app".into()),
            auth_audience: std::env::var("AUTH_AUDIENCE")
                .unwrap_or_else(|_| "arkiv-billing".into()),
            sweep_secret: std::env::var("SWEEP_SECRET").ok(),
            sweep_candidate_timeout_seconds: std::env::var("SWEEP_CANDIDATE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".into()),
            stripe_price_basic: std::env::var("STRIPE_PRICE_BASIC").ok(),
            stripe_price_plus: std::env::var("STRIPE_PRICE_PLUS").ok(),
            stripe_price_premium: std::env::var("STRIPE_PRICE_PREMIUM").ok(),
            trial_days: std::env::var("TRIAL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(14),
            notification_url: std::env::var("NOTIFICATION_URL").ok(),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }

    /// Map a Stripe price reference to a plan.
    ///
    /// Returns `None` for an unrecognized price; the reconciler falls back
    /// to the lowest paid tier and logs a warning in that case.
    #[must_use]
    pub fn plan_for_price(&self, price_ref: &str) -> Option<Plan> {
        if self.stripe_price_basic.as_deref() == Some(price_ref) {
            Some(Plan::Basic)
        } else if self.stripe_price_plus.as_deref() == Some(price_ref) {
            Some(Plan::Plus)
        } else if self.stripe_price_premium.as_deref() == Some(price_ref) {
            Some(Plan::Premium)
        } else {
            None
        }
    }

    /// Get the configured Stripe price ID for a paid plan.
    #[must_use]
    pub fn price_for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Trial => None,
            Plan::Basic => self.stripe_price_basic.as_deref(),
            Plan::Plus => self.stripe_price_plus.as_deref(),
            Plan::Premium => self.stripe_price_premium.as_deref(),
        }
    }
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "arkiv-billing/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/arkiv-billing".into(),
            auth_base_url: "https://id.arkiv.app".into(),
            auth_audience: "arkiv-billing".into(),
            sweep_secret: None,
            sweep_candidate_timeout_seconds: 20,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_base_url: "https://api.stripe.com/v1".into(),
            stripe_price_basic: None,
            stripe_price_plus: None,
            stripe_price_premium: None,
            trial_days: 14,
            notification_url: None,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_mapping_roundtrip() {
        let config = ServiceConfig {
            stripe_price_basic: Some("price_basic".into()),
            stripe_price_plus: Some("price_plus".into()),
            stripe_price_premium: Some("price_premium".into()),
            ..Default::default()
        };

        assert_eq!(config.plan_for_price("price_basic"), Some(Plan::Basic));
        assert_eq!(config.plan_for_price("price_plus"), Some(Plan::Plus));
        assert_eq!(config.plan_for_price("price_premium"), Some(Plan::Premium));
        assert_eq!(config.plan_for_price("price_unknown"), None);

        assert_eq!(config.price_for_plan(Plan::Plus), Some("price_plus"));
        assert_eq!(config.price_for_plan(Plan::Trial), None);
    }
}
