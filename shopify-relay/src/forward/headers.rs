//! The fixed header set sent with every forwarded payload.

use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;

use crate::Config;

pub const API_KEY_HEADER: &str = "apikey";
pub const OVERRIDE_SCHEMA_HEADER: &str = "overrideschema";
pub const OVERRIDE_AGENT_HEADER: &str = "overrideagent";
pub const DEBUG_HEADER: &str = "debug";

/// Headers attached to the outbound Maistro request.
///
/// `override_schema` and `content_type` are constants; the rest come from
/// configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ForwardHeaders {
    pub api_key: String,
    pub override_schema: &'static str,
    pub override_agent: String,
    pub debug: String,
    pub content_type: &'static str,
}

impl ForwardHeaders {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.maistro_api_key.clone(),
            override_schema: "true",
            override_agent: config.override_agent.clone(),
            debug: config.debug.clone(),
            content_type: "application/json",
        }
    }

    /// Attach every header to `request`.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(OVERRIDE_SCHEMA_HEADER, self.override_schema)
            .header(OVERRIDE_AGENT_HEADER, self.override_agent.as_str())
            .header(DEBUG_HEADER, self.debug.as_str())
            .header(CONTENT_TYPE, self.content_type)
    }
}

impl std::fmt::Debug for ForwardHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardHeaders")
            .field("api_key", &"[REDACTED]")
            .field("override_schema", &self.override_schema)
            .field("override_agent", &self.override_agent)
            .field("debug", &self.debug)
            .field("content_type", &self.content_type)
            .finish()
    }
}
