//! Outbound notifications.
//!
//! Lifecycle events fan out to the platform's notification sender (which
//! owns templating and delivery). Sends are fire-and-forget: failures are
//! logged and never propagate into the triggering operation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use arkiv_billing_core::AccountId;

/// A lifecycle notification to fan out.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A trial subscription started.
    TrialStarted {
        /// The account that started the trial.
        account_id: AccountId,
    },

    /// A payment succeeded.
    PaymentSucceeded {
        /// The paying account.
        account_id: AccountId,
        /// Paid amount in cents.
        amount_cents: i64,
    },

    /// A payment attempt failed.
    PaymentFailed {
        /// The affected account.
        account_id: AccountId,
        /// Provider-reported failure reason.
        reason: String,
    },
}

/// Notification delivery seam.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Must not fail the caller: implementations
    /// log delivery problems and return.
    async fn send(&self, notification: Notification);
}

/// Notifier that POSTs JSON to the platform notification endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    /// Create a notifier targeting `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: Notification) {
        let result = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(notification = ?notification, "Notification delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    notification = ?notification,
                    "Notification endpoint returned non-success"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    notification = ?notification,
                    "Failed to deliver notification"
                );
            }
        }
    }
}

/// Notifier used when no endpoint is configured: records the event in the
/// log and drops it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) {
        tracing::info!(notification = ?notification, "Notification (no endpoint configured)");
    }
}
