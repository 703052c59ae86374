//! Webhook endpoint handlers.
//!
//! The Shopify handler does exactly three things:
//! 1. Verify the HMAC signature over the raw body
//! 2. Forward the untouched body to Maistro
//! 3. Map the upstream outcome onto the response
//!
//! The body is never parsed.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::forward::{ForwardError, Forwarder};
use crate::web::signature::verify_shopify_signature;
use crate::Config;

/// HTTP header carrying the base64 HMAC-SHA256 of the body.
pub const HEADER_HMAC: &str = "X-Shopify-Hmac-SHA256";
pub const HEADER_TOPIC: &str = "X-Shopify-Topic";
pub const HEADER_SHOP_DOMAIN: &str = "X-Shopify-Shop-Domain";
pub const HEADER_WEBHOOK_ID: &str = "X-Shopify-Webhook-Id";
pub const HEADER_API_VERSION: &str = "X-Shopify-API-Version";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let config = Arc::new(config);
        let forwarder = Forwarder::new(Arc::clone(&config))?;
        Ok(Self { config, forwarder })
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Shopify Webhook
// =============================================================================

/// An inbound Shopify delivery as seen by the relay.
///
/// Only the signature participates in authentication; the other headers are
/// carried for logging. `signature_present` is set even when the header
/// value is not readable as a string, in which case `signature` is `None`.
#[derive(Debug, Clone)]
pub struct IncomingWebhook {
    pub body: Bytes,
    pub signature_present: bool,
    pub signature: Option<String>,
    pub topic: Option<String>,
    pub shop_domain: Option<String>,
    pub webhook_id: Option<String>,
    pub api_version: Option<String>,
}

impl IncomingWebhook {
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Self {
        // HeaderMap lookups are case-insensitive
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            body,
            signature_present: headers.contains_key(HEADER_HMAC),
            signature: get(HEADER_HMAC),
            topic: get(HEADER_TOPIC),
            shop_domain: get(HEADER_SHOP_DOMAIN),
            webhook_id: get(HEADER_WEBHOOK_ID),
            api_version: get(HEADER_API_VERSION),
        }
    }
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResponse {
    fn unauthorized(message: &str) -> Self {
        Self {
            status: "unauthorized",
            message: Some(message.to_string()),
            upstream_status: None,
            error: None,
        }
    }
}

/// Shopify webhook endpoint.
///
/// Responds 401 when the signature is absent or wrong, 200 when Maistro
/// accepted the payload, and 502 (504 on timeout) when it did not.
pub async fn shopify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let webhook = IncomingWebhook::from_parts(&headers, body);
    let topic = webhook.topic.as_deref().unwrap_or("unknown");
    let shop_domain = webhook.shop_domain.as_deref().unwrap_or("unknown");
    let webhook_id = webhook.webhook_id.as_deref().unwrap_or("unknown");

    info!(
        topic = %topic,
        shop_domain = %shop_domain,
        webhook_id = %webhook_id,
        api_version = ?webhook.api_version,
        body_length = webhook.body.len(),
        has_signature = webhook.signature_present,
        "shopify_webhook_received"
    );

    if !webhook.signature_present {
        warn!(
            topic = %topic,
            shop_domain = %shop_domain,
            reason = "missing_signature",
            "shopify_webhook_rejected"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::unauthorized("Missing signature header")),
        );
    }

    // A header that is not visible ASCII cannot be valid base64
    let verified = webhook.signature.as_deref().is_some_and(|signature| {
        verify_shopify_signature(
            state.config.shopify_secret.as_bytes(),
            &webhook.body,
            signature,
        )
    });

    if !verified {
        warn!(
            topic = %topic,
            shop_domain = %shop_domain,
            reason = "invalid_signature",
            "shopify_webhook_rejected"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::unauthorized("Invalid signature")),
        );
    }

    info!(topic = %topic, shop_domain = %shop_domain, "shopify_signature_verified");

    match state.forwarder.forward(webhook.body.clone()).await {
        Ok(upstream) => {
            info!(
                topic = %topic,
                shop_domain = %shop_domain,
                upstream_status = upstream.status,
                "shopify_webhook_forwarded"
            );
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "forwarded",
                    message: Some("Webhook processed successfully".to_string()),
                    upstream_status: Some(upstream.status),
                    error: None,
                }),
            )
        }
        Err(e) => {
            let detail = state.config.redact(&e.detail());
            error!(
                topic = %topic,
                shop_domain = %shop_domain,
                upstream_status = e.status_code(),
                error = %detail,
                "shopify_webhook_forward_failed"
            );

            let status = match e {
                ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ForwardError::Status { .. } | ForwardError::Unreachable(_) => {
                    StatusCode::BAD_GATEWAY
                }
            };

            (
                status,
                Json(WebhookResponse {
                    status: "forward_failed",
                    message: Some("Webhook received but forwarding failed".to_string()),
                    upstream_status: Some(e.status_code()),
                    error: Some(detail),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::router;
    use crate::web::signature::compute_signature;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use std::io;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_test";
    const API_KEY: &str = "mk-live-0123456789";
    const BODY: &[u8] = br#"{"id":123,"order_number":1001}"#;

    fn state(maistro_url: &str, timeout_ms: u64) -> AppState {
        let maistro_url = maistro_url.to_string();
        let config = Config::from_lookup(move |name| match name {
            "SHOPIFY_SECRET" => Some(SECRET.to_string()),
            "MAISTRO_API_KEY" => Some(API_KEY.to_string()),
            "MAISTRO_URL" => Some(maistro_url.clone()),
            "MAISTRO_TIMEOUT_MS" => Some(timeout_ms.to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config).unwrap()
    }

    fn webhook_request(signature: Option<&str>, body: &'static [u8]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/shopify")
            .header("content-type", "application/json")
            .header(HEADER_TOPIC, "orders/fulfilled")
            .header(HEADER_SHOP_DOMAIN, "example.myshopify.com");
        if let Some(signature) = signature {
            builder = builder.header(HEADER_HMAC, signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    /// In-memory sink for a test-scoped tracing subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Route every event on this thread into the returned buffer until the guard drops.
    fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    async fn read_body(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn maistro(status: u16, body: &str, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/acme/maistro"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_valid_signature_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/acme/maistro"))
            .and(header("apikey", API_KEY))
            .and(header("overrideschema", "true"))
            .and(header("overrideagent", "test_order_fulfilled"))
            .and(header("debug", "false"))
            .and(header("content-type", "application/json"))
            .and(body_bytes(BODY))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["status"], "forwarded");
        assert_eq!(json["upstream_status"], 201);
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected_without_forwarding() {
        let server = maistro(200, "{}", 0).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));

        let response = app
            .oneshot(webhook_request(Some("tampered=="), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected_without_forwarding() {
        let server = maistro(200, "{}", 0).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));

        let response = app.oneshot(webhook_request(None, BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["status"], "unauthorized");
        assert_eq!(json["message"], "Missing signature header");
        server.verify().await;
    }

    #[tokio::test]
    async fn test_signature_for_other_body_is_rejected() {
        let server = maistro(200, "{}", 0).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), br#"{"id":124}"#);

        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_signature_header_casing_is_irrelevant() {
        let server = maistro(200, "{}", 1).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/shopify")
            .header("x-shopify-shop-domain", "example.myshopify.com")
            .header("x-shopify-hmac-sha256", signature)
            .header("X-SHOPIFY-TOPIC", "orders/create")
            .body(Body::from(BODY))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upstream_error_maps_to_bad_gateway_without_api_key() {
        let server = maistro(500, &format!("bad credentials for apikey={}", API_KEY), 1).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = read_body(response).await;
        assert!(!body.contains(API_KEY));
        assert!(!body.contains(SECRET));

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "forward_failed");
        assert_eq!(json["upstream_status"], 500);
        assert_eq!(json["error"], "bad credentials for apikey=[REDACTED]");
    }

    #[tokio::test]
    async fn test_upstream_timeout_maps_to_gateway_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let app = router(state(&server.uri(), 250));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let started = Instant::now();
        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(3));

        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["upstream_status"], 504);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_maps_to_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app = router(state(&format!("http://{}/maistro", addr), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["upstream_status"], 502);
    }

    #[tokio::test]
    async fn test_unreadable_signature_header_is_invalid_not_missing() {
        let server = maistro(200, "{}", 0).await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/shopify")
            .header(HEADER_HMAC, HeaderValue::from_bytes(b"sig\xffnature").unwrap())
            .body(Body::from(BODY))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["message"], "Invalid signature");
        server.verify().await;
    }

    #[tokio::test]
    async fn test_upstream_redirect_is_not_followed() {
        let elsewhere = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&elsewhere)
            .await;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/acme/maistro"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/elsewhere", elsewhere.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(json["upstream_status"], 302);
        elsewhere.verify().await;
    }

    #[tokio::test]
    async fn test_upstream_error_logs_omit_credentials() {
        let server = maistro(
            500,
            &format!("rejected apikey={} secret={}", API_KEY, SECRET),
            1,
        )
        .await;
        let app = router(state(&format!("{}/v1/acme/maistro", server.uri()), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let (logs, _guard) = capture_logs();
        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let output = logs.contents();
        assert!(output.contains("maistro_forward_rejected"));
        assert!(output.contains("shopify_webhook_forward_failed"));
        assert!(!output.contains(API_KEY));
        assert!(!output.contains(SECRET));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_logs_omit_credentials() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app = router(state(&format!("http://{}/maistro", addr), 2000));
        let signature = compute_signature(SECRET.as_bytes(), BODY);

        let (logs, _guard) = capture_logs();
        let response = app
            .oneshot(webhook_request(Some(&signature), BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let output = logs.contents();
        assert!(output.contains("shopify_webhook_forward_failed"));
        assert!(!output.contains(API_KEY));
        assert!(!output.contains(SECRET));
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state("http://127.0.0.1:9/maistro", 2000));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_incoming_webhook_from_parts() {
        let mut headers = HeaderMap::new();
        headers.insert("x-shopify-hmac-sha256", "c2ln".parse().unwrap());
        headers.insert("x-shopify-topic", "orders/create".parse().unwrap());
        headers.insert("x-shopify-webhook-id", "b54557e4".parse().unwrap());

        let webhook = IncomingWebhook::from_parts(&headers, Bytes::from_static(BODY));

        assert!(webhook.signature_present);
        assert_eq!(webhook.signature.as_deref(), Some("c2ln"));
        assert_eq!(webhook.topic.as_deref(), Some("orders/create"));
        assert_eq!(webhook.webhook_id.as_deref(), Some("b54557e4"));
        assert_eq!(webhook.shop_domain, None);
        assert_eq!(webhook.api_version, None);
        assert_eq!(&webhook.body[..], BODY);
    }
}
