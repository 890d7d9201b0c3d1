//! Stripe payment-provider integration.
//!
//! The client wraps the handful of API operations this service consumes;
//! webhook payloads are decoded into [`events::ProviderEvent`] at the
//! boundary.

pub mod client;
pub mod events;
pub mod types;

pub use client::{StripeClient, StripeError};
pub use events::{CheckoutCompleted, ProviderEvent, SubscriptionState, WebhookEnvelope};
