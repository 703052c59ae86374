//! Maistro API client.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use reqwest::{redirect, Client, Response};
use thiserror::Error;
use tracing::{error, info, warn};

use super::headers::ForwardHeaders;
use crate::Config;

/// Upstream bodies are cut to this many bytes before logging or echoing.
pub const MAX_UPSTREAM_BODY_BYTES: usize = 1024;

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A 2xx answer from Maistro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Why a payload did not reach Maistro successfully.
///
/// All text is already scrubbed of credentials.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("maistro responded with status {status}")]
    Status { status: u16, body: String },

    #[error("maistro did not respond within {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("maistro unreachable: {0}")]
    Unreachable(String),
}

impl ForwardError {
    /// Upstream status, or a synthetic gateway code when none was received.
    pub fn status_code(&self) -> u16 {
        match self {
            ForwardError::Status { status, .. } => *status,
            ForwardError::Timeout { .. } => 504,
            ForwardError::Unreachable(_) => 502,
        }
    }

    /// Diagnostic detail safe to hand back to the caller.
    pub fn detail(&self) -> String {
        match self {
            ForwardError::Status { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

/// Posts verified payloads to the configured Maistro endpoint.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    config: Arc<Config>,
    headers: ForwardHeaders,
}

impl Forwarder {
    /// Build a forwarder whose client enforces the configured timeout.
    ///
    /// Redirects are never followed: a 3xx is reported as a failed forward.
    pub fn new(config: Arc<Config>) -> reqwest::Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(MAX_CONNECT_TIMEOUT))
            .user_agent(concat!("shopify-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            headers: ForwardHeaders::from_config(&config),
            client,
            config,
        })
    }

    /// Forward `raw_body` verbatim. Exactly one attempt is made.
    pub async fn forward(&self, raw_body: Bytes) -> Result<UpstreamResponse, ForwardError> {
        let url = self.config.maistro_url.as_str();
        let timeout = self.config.request_timeout;

        info!(
            url = url,
            body_length = raw_body.len(),
            timeout_ms = timeout.as_millis() as u64,
            "maistro_forward_starting"
        );

        let request = self.headers.apply(self.client.post(url)).body(raw_body);

        let mut response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.transport_error(e)),
        };

        let status = response.status();
        let body = match read_capped(&mut response).await {
            Ok(bytes) => self.config.redact(&truncate_body(&bytes)),
            Err(e) if e.is_timeout() => return Err(self.transport_error(e)),
            Err(e) => {
                warn!(
                    status_code = status.as_u16(),
                    error = %self.config.redact(&e.to_string()),
                    "maistro_response_body_unreadable"
                );
                String::new()
            }
        };

        if status.is_success() {
            info!(url = url, status_code = status.as_u16(), "maistro_forward_complete");
            Ok(UpstreamResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            error!(
                url = url,
                status_code = status.as_u16(),
                response_body = %body,
                "maistro_forward_rejected"
            );
            Err(ForwardError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ForwardError {
        let url = self.config.maistro_url.as_str();

        if e.is_timeout() {
            error!(
                url = url,
                timeout_ms = self.config.request_timeout.as_millis() as u64,
                "maistro_forward_timeout"
            );
            ForwardError::Timeout {
                after: self.config.request_timeout,
            }
        } else {
            let message = self.config.redact(&e.to_string());
            if e.is_connect() {
                error!(url = url, error = %message, "maistro_forward_connect_error");
            } else {
                error!(url = url, error = %message, "maistro_forward_error");
            }
            ForwardError::Unreachable(message)
        }
    }
}

/// Read at most one byte past `MAX_UPSTREAM_BODY_BYTES`, then stop.
async fn read_capped(response: &mut Response) -> reqwest::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = (MAX_UPSTREAM_BODY_BYTES + 1).saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buf.len() > MAX_UPSTREAM_BODY_BYTES {
            break;
        }
    }
    Ok(buf)
}

/// Lossy UTF-8 view of `bytes`, cut at a char boundary.
fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_UPSTREAM_BODY_BYTES {
        return text.into_owned();
    }

    let mut end = MAX_UPSTREAM_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &text[..end])
}
