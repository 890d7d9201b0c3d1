//! Webhook handlers for the payment provider.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::reconciler;
use crate::state::AppState;
use crate::stripe::WebhookEnvelope;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
///
/// The signature is verified against the raw body before anything is
/// parsed; a bad or missing signature rejects with 400 and no state
/// change. Recognized events are decoded once into the event sum type and
/// handed to the reconciler. Store or provider failures surface as 5xx so
/// the provider redelivers, which the idempotent handlers tolerate.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    // Verify signature if a webhook secret is configured
    if state.config.stripe_webhook_secret.is_some() {
        let sig = signature
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

        if let Some(stripe) = &state.stripe {
            stripe.verify_webhook_signature(&body, sig).map_err(|e| {
                tracing::warn!(error = %e, "Invalid Stripe webhook signature");
                ApiError::BadRequest("Invalid webhook signature".into())
            })?;
        } else {
            tracing::warn!(
                "Stripe webhook_secret configured but client not available - skipping verification"
            );
        }
    } else {
        // No webhook_secret configured - skip verification (development mode)
        tracing::warn!("Stripe webhook_secret not configured - skipping signature verification");
    }

    // Parse webhook payload
    let envelope: WebhookEnvelope =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %envelope.event_type,
        event_id = %envelope.id,
        "Received Stripe webhook"
    );

    let event = envelope.decode().map_err(|e| {
        tracing::warn!(error = %e, "Malformed webhook payload");
        ApiError::BadRequest(e.to_string())
    })?;

    reconciler::apply_provider_event(&state, event).await?;

    Ok(Json(WebhookResponse { received: true }))
}
