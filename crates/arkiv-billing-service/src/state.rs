//! Application state.

use std::sync::Arc;

use arkiv_billing_store::Store;

use crate::auth::JwksCache;
use crate::config::ServiceConfig;
use crate::notify::{HttpNotifier, LogNotifier, Notifier};
use crate::stripe::StripeClient;

/// Application state shared across handlers.
///
/// Everything mutable lives behind an injected handle here; there are no
/// process-global singletons.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for provider calls (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Notification sender.
    pub notifier: Arc<dyn Notifier>,

    /// JWKS key cache for JWT validation.
    pub jwks: Arc<JwksCache>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        // Create Stripe client if configured
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(
                &config.stripe_base_url,
                key,
                config.stripe_webhook_secret.clone(),
            ) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - provider calls will be skipped");
        }

        let notifier: Arc<dyn Notifier> = match &config.notification_url {
            Some(url) => match HttpNotifier::new(url) {
                Ok(notifier) => {
                    tracing::info!(url = %url, "Notification endpoint enabled");
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create notifier - logging only");
                    Arc::new(LogNotifier)
                }
            },
            None => {
                tracing::warn!("Notification endpoint not configured - logging only");
                Arc::new(LogNotifier)
            }
        };

        Self {
            store,
            config,
            stripe,
            notifier,
            jwks: Arc::new(JwksCache::new()),
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }
}
