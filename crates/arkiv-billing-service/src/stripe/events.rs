//! Webhook event decoding.
//!
//! Webhook payloads are decoded and validated here, once, at the boundary.
//! The reconciler only ever sees the [`ProviderEvent`] sum type, never raw
//! JSON.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{CheckoutSession, ProviderSubscription};

/// A decoded provider webhook event.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A checkout session completed; a subscription now exists upstream.
    CheckoutCompleted(CheckoutCompleted),

    /// A subscription was created or updated upstream.
    SubscriptionUpdated(SubscriptionState),

    /// A subscription was deleted upstream. Terminal.
    SubscriptionDeleted {
        /// Provider customer reference.
        customer_ref: String,
    },

    /// An invoice was paid.
    InvoicePaid {
        /// Provider customer reference.
        customer_ref: String,
        /// Paid amount in cents.
        amount_cents: i64,
    },

    /// An invoice payment attempt failed.
    InvoicePaymentFailed {
        /// Provider customer reference.
        customer_ref: String,
        /// Provider-reported failure reason.
        reason: String,
    },

    /// An event type this service does not handle. Acknowledged and ignored.
    Unrecognized {
        /// The raw event type string.
        event_type: String,
    },
}

/// Payload of a completed checkout.
#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    /// Our account ID, from `client_reference_id`.
    pub account_ref: String,
    /// Provider customer reference.
    pub customer_ref: Option<String>,
    /// Provider subscription reference.
    pub subscription_ref: Option<String>,
    /// Price reference from session metadata, for the plan mapping.
    pub price_ref: Option<String>,
}

/// Normalized subscription state carried by created/updated events.
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    /// Provider customer reference.
    pub customer_ref: String,
    /// Provider subscription reference.
    pub subscription_ref: String,
    /// Provider sub-status string (active, trialing, past_due, ...).
    pub status: String,
    /// Cancel-at-period-end flag.
    pub cancel_at_period_end: bool,
    /// Trial end.
    pub trial_end: Option<DateTime<Utc>>,
    /// Paid period start.
    pub current_period_start: Option<DateTime<Utc>>,
    /// Paid period end.
    pub current_period_end: Option<DateTime<Utc>>,
    /// Price reference of the first line item, for the plan mapping.
    pub price_ref: Option<String>,
}

/// Webhook envelope as delivered by the provider.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
}

/// Webhook event data container.
#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Errors produced while decoding a webhook payload.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    /// The event object did not match the expected shape.
    #[error("malformed {event_type} payload: {reason}")]
    Malformed {
        /// Event type being decoded.
        event_type: String,
        /// What was wrong.
        reason: String,
    },
}

/// Subscription payload with the line-item price included.
#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    #[serde(flatten)]
    subscription: ProviderSubscription,
    #[serde(default)]
    items: Option<SubscriptionItems>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(default)]
    price: Option<ItemPrice>,
}

#[derive(Debug, Deserialize)]
struct ItemPrice {
    id: String,
}

/// Invoice payload as carried by invoice events.
#[derive(Debug, Deserialize)]
struct InvoicePayload {
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    amount_paid: Option<i64>,
    #[serde(default)]
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError {
    #[serde(default)]
    message: Option<String>,
}

impl WebhookEnvelope {
    /// Decode this envelope into a [`ProviderEvent`].
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized event type carries a payload that
    /// does not match its expected shape or is missing a required field.
    pub fn decode(&self) -> Result<ProviderEvent, EventDecodeError> {
        match self.event_type.as_str() {
            "checkout.session.completed" => self.decode_checkout_completed(),
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.decode_subscription_state().map(ProviderEvent::SubscriptionUpdated)
            }
            "customer.subscription.deleted" => {
                let state = self.decode_subscription_state()?;
                Ok(ProviderEvent::SubscriptionDeleted {
                    customer_ref: state.customer_ref,
                })
            }
            "invoice.paid" | "invoice.payment_succeeded" => {
                let invoice = self.decode_invoice()?;
                Ok(ProviderEvent::InvoicePaid {
                    customer_ref: self.require_customer(invoice.customer)?,
                    amount_cents: invoice.amount_paid.unwrap_or(0),
                })
            }
            "invoice.payment_failed" => {
                let invoice = self.decode_invoice()?;
                let reason = invoice
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "payment failed".to_string());
                Ok(ProviderEvent::InvoicePaymentFailed {
                    customer_ref: self.require_customer(invoice.customer)?,
                    reason,
                })
            }
            other => Ok(ProviderEvent::Unrecognized {
                event_type: other.to_string(),
            }),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> EventDecodeError {
        EventDecodeError::Malformed {
            event_type: self.event_type.clone(),
            reason: reason.into(),
        }
    }

    fn require_customer(&self, customer: Option<String>) -> Result<String, EventDecodeError> {
        customer.ok_or_else(|| self.malformed("missing customer"))
    }

    fn decode_checkout_completed(&self) -> Result<ProviderEvent, EventDecodeError> {
        let session: CheckoutSession = serde_json::from_value(self.data.object.clone())
            .map_err(|e| self.malformed(e.to_string()))?;

        let account_ref = session
            .client_reference_id
            .ok_or_else(|| self.malformed("missing client_reference_id"))?;

        let price_ref = session
            .metadata
            .get("price_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(ProviderEvent::CheckoutCompleted(CheckoutCompleted {
            account_ref,
            customer_ref: session.customer,
            subscription_ref: session.subscription,
            price_ref,
        }))
    }

    fn decode_subscription_state(&self) -> Result<SubscriptionState, EventDecodeError> {
        let payload: SubscriptionPayload = serde_json::from_value(self.data.object.clone())
            .map_err(|e| self.malformed(e.to_string()))?;

        let customer_ref = self.require_customer(payload.subscription.customer.clone())?;

        let price_ref = payload
            .items
            .and_then(|items| items.data.into_iter().next())
            .and_then(|item| item.price)
            .map(|price| price.id);

        Ok(SubscriptionState {
            customer_ref,
            subscription_ref: payload.subscription.id,
            status: payload.subscription.status,
            cancel_at_period_end: payload.subscription.cancel_at_period_end,
            trial_end: payload.subscription.trial_end.and_then(from_unix),
            current_period_start: payload
                .subscription
                .current_period_start
                .and_then(from_unix),
            current_period_end: payload.subscription.current_period_end.and_then(from_unix),
            price_ref,
        })
    }

    fn decode_invoice(&self) -> Result<InvoicePayload, EventDecodeError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| self.malformed(e.to_string()))
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn decodes_checkout_completed() {
        let env = envelope(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "client_reference_id": "9c5b9d6e-6f5b-4d0a-9e25-0a6ad4f5a111",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "price_id": "price_basic" }
            }),
        );

        let ProviderEvent::CheckoutCompleted(checkout) = env.decode().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(checkout.customer_ref.as_deref(), Some("cus_1"));
        assert_eq!(checkout.subscription_ref.as_deref(), Some("sub_1"));
        assert_eq!(checkout.price_ref.as_deref(), Some("price_basic"));
    }

    #[test]
    fn checkout_without_client_reference_is_malformed() {
        let env = envelope(
            "checkout.session.completed",
            json!({ "id": "cs_1", "customer": "cus_1" }),
        );
        assert!(env.decode().is_err());
    }

    #[test]
    fn decodes_subscription_updated_with_price() {
        let env = envelope(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "cancel_at_period_end": true,
                "trial_end": 1_700_000_000,
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "items": { "data": [ { "price": { "id": "price_plus" } } ] }
            }),
        );

        let ProviderEvent::SubscriptionUpdated(state) = env.decode().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(state.customer_ref, "cus_1");
        assert_eq!(state.status, "active");
        assert!(state.cancel_at_period_end);
        assert!(state.trial_end.is_some());
        assert_eq!(state.price_ref.as_deref(), Some("price_plus"));
    }

    #[test]
    fn decodes_subscription_deleted() {
        let env = envelope(
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "canceled" }),
        );
        let ProviderEvent::SubscriptionDeleted { customer_ref } = env.decode().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(customer_ref, "cus_1");
    }

    #[test]
    fn decodes_invoice_events() {
        let env = envelope(
            "invoice.paid",
            json!({ "id": "in_1", "customer": "cus_1", "amount_paid": 900 }),
        );
        let ProviderEvent::InvoicePaid {
            customer_ref,
            amount_cents,
        } = env.decode().unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(customer_ref, "cus_1");
        assert_eq!(amount_cents, 900);

        let env = envelope(
            "invoice.payment_failed",
            json!({
                "id": "in_2",
                "customer": "cus_1",
                "last_payment_error": { "message": "card_declined" }
            }),
        );
        let ProviderEvent::InvoicePaymentFailed { reason, .. } = env.decode().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(reason, "card_declined");
    }

    #[test]
    fn unknown_event_types_are_unrecognized() {
        let env = envelope("customer.created", json!({ "id": "cus_1" }));
        let ProviderEvent::Unrecognized { event_type } = env.decode().unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(event_type, "customer.created");
    }
}
