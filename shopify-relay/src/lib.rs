//! Shopify Relay - verified webhook forwarding.
//!
//! Receives Shopify webhooks, checks their HMAC-SHA256 signature against the
//! shared secret and relays the untouched body to the Maistro API.
//!
//! ## Flow
//!
//! ```text
//! Shopify → /webhooks/shopify → signature check → Maistro
//!                                     │
//!                                     └─ mismatch → 401
//! ```

pub mod config;
pub mod forward;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use forward::{ForwardError, ForwardHeaders, Forwarder, UpstreamResponse};
pub use web::{router, AppState};
