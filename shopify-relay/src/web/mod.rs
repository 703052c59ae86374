//! Web server module for handling inbound Shopify webhooks.
//!
//! This module provides a thin web server that:
//! - Receives webhooks from Shopify
//! - Verifies the HMAC signature over the raw body
//! - Forwards the verified body to Maistro unchanged
//! - Reports the upstream outcome to Shopify
//!
//! Nothing is queued or stored between requests.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    health, shopify_webhook, AppState, HealthResponse, IncomingWebhook, WebhookResponse,
};
pub use signature::{compute_signature, verify_shopify_signature};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/shopify", post(shopify_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
