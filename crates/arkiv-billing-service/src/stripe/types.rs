//! Stripe API types.

use serde::Deserialize;

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Customer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Metadata attached to the customer.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Client reference ID (our `account_id`).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Session status.
    #[serde(default)]
    pub status: Option<String>,
    /// Subscription created by the session.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    /// Subscription ID.
    pub id: String,
    /// Owning customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Provider sub-status (active, trialing, past_due, canceled, ...).
    #[serde(default)]
    pub status: String,
    /// Whether the subscription cancels at the period end.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Trial end timestamp (Unix).
    #[serde(default)]
    pub trial_end: Option<i64>,
    /// Current period start timestamp (Unix).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Current period end timestamp (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Stripe invoice object (only the fields this service reads).
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID. Upcoming-invoice previews carry none.
    #[serde(default)]
    pub id: Option<String>,
    /// Owning customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Amount due in cents.
    #[serde(default)]
    pub amount_due: i64,
    /// Currency (e.g., "usd").
    #[serde(default)]
    pub currency: String,
    /// Next payment attempt timestamp (Unix).
    #[serde(default)]
    pub next_payment_attempt: Option<i64>,
}

/// Stripe billing-portal session object.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    /// Session ID.
    pub id: String,
    /// Portal URL to redirect the user to.
    pub url: String,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}
