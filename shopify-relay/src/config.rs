//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup into an immutable [`Config`]. Missing
//! credentials are a startup failure, never a per-request one.

use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderValue;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default Maistro API base, without the instance segment.
pub const DEFAULT_MAISTRO_BASE_URL: &str = "https://api-usw.neuralseek.com/v1";

/// Agent Maistro runs when none is configured.
pub const DEFAULT_OVERRIDE_AGENT: &str = "test_order_fulfilled";

/// Debug header value when none is configured.
pub const DEFAULT_DEBUG: &str = "false";

/// Upstream request timeout when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

const REDACTED: &str = "[REDACTED]";

/// Errors raised while loading configuration.
///
/// Messages name the variable, never its value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("maistro target url is invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shopify webhook signing secret (HMAC key)
    pub shopify_secret: String,

    /// Maistro API key, sent as the `apikey` header
    pub maistro_api_key: String,

    /// Fully resolved Maistro endpoint the payload is posted to
    pub maistro_url: Url,

    /// Value of the `overrideagent` header
    pub override_agent: String,

    /// Value of the `debug` header
    pub debug: String,

    /// Upper bound for the whole upstream exchange
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let shopify_secret =
            non_blank("SHOPIFY_SECRET").ok_or(ConfigError::Missing("SHOPIFY_SECRET"))?;

        let maistro_api_key =
            non_blank("MAISTRO_API_KEY").ok_or(ConfigError::Missing("MAISTRO_API_KEY"))?;

        let maistro_url = match non_blank("MAISTRO_URL") {
            Some(raw) => Url::parse(raw.trim())?,
            None => {
                let instance_id = non_blank("MAISTRO_INSTANCE_ID")
                    .ok_or(ConfigError::Missing("MAISTRO_INSTANCE_ID"))?;
                let base = non_blank("MAISTRO_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_MAISTRO_BASE_URL.to_string());
                build_maistro_url(&base, &instance_id)?
            }
        };

        if !matches!(maistro_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: "MAISTRO_URL",
                reason: format!("unsupported scheme {}", maistro_url.scheme()),
            });
        }

        let timeout_ms = match non_blank("MAISTRO_TIMEOUT_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "MAISTRO_TIMEOUT_MS",
                        reason: "expected a positive number of milliseconds".to_string(),
                    })
                }
            },
            None => DEFAULT_TIMEOUT_MS,
        };

        let port = lookup("PORT")
            .and_then(|v| match v.trim().parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!(env_var = "PORT", value = %v, "Invalid port, using default");
                    None
                }
            })
            .unwrap_or(8080);

        let override_agent = non_blank("MAISTRO_OVERRIDE_AGENT")
            .unwrap_or_else(|| DEFAULT_OVERRIDE_AGENT.to_string());
        let debug = non_blank("MAISTRO_DEBUG").unwrap_or_else(|| DEFAULT_DEBUG.to_string());

        // These travel as header values on every forwarded request
        ensure_header_value("MAISTRO_API_KEY", &maistro_api_key)?;
        ensure_header_value("MAISTRO_OVERRIDE_AGENT", &override_agent)?;
        ensure_header_value("MAISTRO_DEBUG", &debug)?;

        Ok(Config {
            port,
            shopify_secret,
            maistro_api_key,
            maistro_url,
            override_agent,
            debug,
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Scrub the shared secret and API key out of `text`.
    pub fn redact(&self, text: &str) -> String {
        text.replace(self.maistro_api_key.as_str(), REDACTED)
            .replace(self.shopify_secret.as_str(), REDACTED)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("shopify_secret", &REDACTED)
            .field("maistro_api_key", &REDACTED)
            .field("maistro_url", &self.maistro_url.as_str())
            .field("override_agent", &self.override_agent)
            .field("debug", &self.debug)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn ensure_header_value(name: &'static str, value: &str) -> Result<(), ConfigError> {
    HeaderValue::from_str(value)
        .map(|_| ())
        .map_err(|_| ConfigError::Invalid {
            name,
            reason: "not a valid HTTP header value".to_string(),
        })
}

/// Join `{base}/{instance_id}/maistro`, tolerating a trailing slash on the base.
fn build_maistro_url(base: &str, instance_id: &str) -> Result<Url, ConfigError> {
    let instance_id = instance_id.trim();
    if instance_id.contains('/') {
        return Err(ConfigError::Invalid {
            name: "MAISTRO_INSTANCE_ID",
            reason: "must not contain '/'".to_string(),
        });
    }

    let base = base.trim().trim_end_matches('/');
    Ok(Url::parse(&format!("{}/{}/maistro", base, instance_id))?)
}
