//! Forwarding verified webhook payloads to the Maistro API.
//!
//! One POST per webhook, fixed headers, no retries. Failures come back as
//! [`ForwardError`] values for the web layer to map onto a response.

pub mod headers;
pub mod maistro;

pub use headers::ForwardHeaders;
pub use maistro::{ForwardError, Forwarder, UpstreamResponse, MAX_UPSTREAM_BODY_BYTES};
