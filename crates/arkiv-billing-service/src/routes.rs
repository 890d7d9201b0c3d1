//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, subscription, sweep, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Subscription (JWT auth)
/// - `GET /v1/subscription` - Get the account's subscription record
/// - `GET /v1/subscription/access` - Access decision for write operations
/// - `POST /v1/subscription/auto-renew` - Toggle auto-renew
/// - `POST /v1/subscription/checkout` - Create a checkout session
/// - `POST /v1/subscription/portal` - Create a billing-portal session
/// - `GET /v1/subscription/invoice/upcoming` - Upcoming-invoice preview
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
///
/// ## Internal (shared-secret auth)
/// - `POST /internal/sweep` - Cancellation sweep trigger
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Create concurrency-limited API routes
    let api_routes = Router::new()
        .route("/subscription", get(subscription::get_subscription))
        .route("/subscription/access", get(subscription::get_access))
        .route("/subscription/auto-renew", post(subscription::set_auto_renew))
        .route("/subscription/checkout", post(subscription::create_checkout))
        .route("/subscription/portal", post(subscription::create_portal))
        .route(
            "/subscription/invoice/upcoming",
            get(subscription::upcoming_invoice),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the provider)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Scheduler trigger
        .route("/internal/sweep", post(sweep::run_sweep))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
