//! Arkiv Billing HTTP API Service.
//!
//! This crate provides the HTTP API for the arkiv subscription billing
//! service, including:
//!
//! - Subscription record queries and the access-policy decision
//! - Auto-renew toggling
//! - Stripe webhooks (subscription lifecycle, invoices)
//! - The scheduled cancellation sweep
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **Identity-provider JWT tokens** - For end-user requests (dashboard)
//! 2. **Shared sweep secret** - For the external scheduler

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for consistency

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod reconciler;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
