//! Stripe API client implementation.

use reqwest::Client;
use std::time::Duration;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

use super::types::{
    Customer, CheckoutSession, Invoice, PortalSession, ProviderSubscription, StripeErrorResponse,
};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StripeError {
    /// Whether this error reports that the resource is already gone.
    ///
    /// Cancelling an already-cancelled subscription comes back as
    /// `resource_missing`; the sweep treats that as success.
    #[must_use]
    pub fn is_resource_missing(&self) -> bool {
        matches!(
            self,
            Self::Api { code: Some(code), .. } if code == "resource_missing"
        )
    }
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_secret: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Stripe API base URL (overridable for tests)
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `webhook_secret` - Optional webhook signing secret (`whsec_...`)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StripeError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_secret,
        })
    }

    /// Create a new Stripe customer.
    ///
    /// # Arguments
    ///
    /// * `account_id` - Our internal account ID (stored as metadata)
    /// * `email` - Optional customer email
    pub async fn create_customer(
        &self,
        account_id: &str,
        email: Option<&str>,
    ) -> Result<Customer, StripeError> {
        let mut params = vec![("metadata[account_id]", account_id.to_string())];

        if let Some(email) = email {
            params.push(("email", email.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a Checkout session for a subscription with a trial.
    ///
    /// # Arguments
    ///
    /// * `customer_id` - Stripe customer ID
    /// * `account_id` - Our internal account ID (`client_reference_id`)
    /// * `price_id` - Stripe price for the selected plan
    /// * `trial_days` - Trial period offered on the new subscription
    /// * `success_url` / `cancel_url` - Redirect targets
    pub async fn create_subscription_checkout(
        &self,
        customer_id: &str,
        account_id: &str,
        price_id: &str,
        trial_days: u32,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("customer", customer_id.to_string()),
            ("success_url", success_url.to_string()),
            ("cancel_url", cancel_url.to_string()),
            ("client_reference_id", account_id.to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("metadata[account_id]", account_id.to_string()),
            ("metadata[price_id]", price_id.to_string()),
        ];

        if trial_days > 0 {
            params.push((
                "subscription_data[trial_period_days]",
                trial_days.to_string(),
            ));
        }

        tracing::debug!(
            account_id = %account_id,
            price_id = %price_id,
            trial_days = %trial_days,
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a billing-portal session for a customer.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError> {
        let params = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/billing_portal/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a subscription by ID.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, StripeError> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Set or clear the cancel-at-period-end flag on a subscription.
    pub async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> Result<ProviderSubscription, StripeError> {
        let params = [("cancel_at_period_end", cancel.to_string())];

        let response = self
            .client
            .post(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a subscription immediately.
    ///
    /// An already-cancelled subscription (`resource_missing`) is treated as
    /// success so the sweep stays idempotent under redelivery and retries.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeError> {
        let response = self
            .client
            .delete(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        match self
            .handle_response::<ProviderSubscription>(response)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_resource_missing() => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    "Subscription already cancelled at provider"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Preview the upcoming invoice for a customer.
    ///
    /// Returns `None` when there is no upcoming invoice (Stripe reports
    /// `invoice_upcoming_none`).
    pub async fn get_upcoming_invoice(
        &self,
        customer_id: &str,
    ) -> Result<Option<Invoice>, StripeError> {
        let response = self
            .client
            .get(format!("{}/invoices/upcoming", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("customer", customer_id)])
            .send()
            .await?;

        match self.handle_response::<Invoice>(response).await {
            Ok(invoice) => Ok(Some(invoice)),
            Err(StripeError::Api { code: Some(code), .. }) if code == "invoice_upcoming_none" => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Verify a webhook signature.
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw request body
    /// * `signature` - Value of the `Stripe-Signature` header
    ///
    /// # Errors
    ///
    /// Returns an error if no secret is configured, the header is
    /// malformed, or no signature matches.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<(), StripeError> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| StripeError::Configuration("Webhook secret not configured".into()))?;

        // Parse the signature header
        // Format: t=timestamp,v1=signature,v1=signature2,...
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            let mut kv = part.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some("t"), Some(ts)) => timestamp = Some(ts),
                (Some("v1"), Some(sig)) => signatures.push(sig),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;

        if signatures.is_empty() {
            return Err(StripeError::InvalidSignature);
        }

        // Compute expected signature over "<timestamp>.<payload>"
        let signed_payload = format!("{timestamp}.{payload}");
        let expected = hmac_sha256_hex(secret, &signed_payload);

        // Check if any signature matches (constant-time comparison)
        let valid = signatures.iter().any(|sig| constant_time_eq(&expected, sig));

        if valid {
            Ok(())
        } else {
            Err(StripeError::InvalidSignature)
        }
    }

    /// Whether a webhook secret is configured.
    #[must_use]
    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(secret: Option<&str>) -> StripeClient {
        StripeClient::new(
            "https://api.stripe.com/v1",
            "sk_test_xxx",
            secret.map(String::from),
        )
        .unwrap()
    }

    #[test]
    fn client_creation() {
        assert!(!client(None).has_webhook_secret());
        assert!(client(Some("whsec_xxx")).has_webhook_secret());
    }

    #[test]
    fn signature_verification_accepts_valid() {
        let client = client(Some("whsec_test"));
        let payload = r#"{"id":"evt_1"}"#;
        let timestamp = "1700000000";
        let sig = hmac_sha256_hex("whsec_test", &format!("{timestamp}.{payload}"));
        let header = format!("t={timestamp},v1={sig}");

        assert!(client.verify_webhook_signature(payload, &header).is_ok());
    }

    #[test]
    fn signature_verification_rejects_tampered_payload() {
        let client = client(Some("whsec_test"));
        let timestamp = "1700000000";
        let sig = hmac_sha256_hex("whsec_test", &format!("{timestamp}.original"));
        let header = format!("t={timestamp},v1={sig}");

        assert!(matches!(
            client.verify_webhook_signature("tampered", &header),
            Err(StripeError::InvalidSignature)
        ));
    }

    #[test]
    fn signature_verification_rejects_missing_parts() {
        let client = client(Some("whsec_test"));
        assert!(client.verify_webhook_signature("{}", "v1=abc").is_err());
        assert!(client.verify_webhook_signature("{}", "t=123").is_err());
        assert!(client.verify_webhook_signature("{}", "garbage").is_err());
    }

    #[test]
    fn resource_missing_detection() {
        let err = StripeError::Api {
            error_type: "invalid_request_error".into(),
            message: "No such subscription".into(),
            code: Some("resource_missing".into()),
        };
        assert!(err.is_resource_missing());
        assert!(!StripeError::InvalidSignature.is_resource_missing());
    }
}
