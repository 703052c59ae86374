//! Shopify webhook signature verification.
//!
//! Shopify signs the raw request body with HMAC-SHA256 and sends the
//! base64-encoded digest in `X-Shopify-Hmac-SHA256`.
//! Reference: https://shopify.dev/docs/apps/build/webhooks/subscribe/https#step-5-verify-the-webhook

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verify a Shopify webhook signature.
///
/// # Arguments
///
/// * `secret` - The app's webhook signing secret
/// * `raw_body` - The request body exactly as received
/// * `signature` - The `X-Shopify-Hmac-SHA256` header value
///
/// # Returns
///
/// `true` only if `signature` is the base64 HMAC-SHA256 of `raw_body` under
/// `secret`. Every failure mode, including an empty secret or a malformed
/// header, yields `false`.
pub fn verify_shopify_signature(secret: &[u8], raw_body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "shopify_signature_missing_fields"
        );
        return false;
    }

    let supplied = match general_purpose::STANDARD.decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(signature_length = signature.len(), "shopify_signature_malformed");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => {
            warn!("shopify_signature_invalid_key");
            return false;
        }
    };

    mac.update(raw_body);

    // verify_slice compares in constant time and rejects length mismatches
    let valid = mac.verify_slice(&supplied).is_ok();

    if !valid {
        warn!(
            body_length = raw_body.len(),
            decoded_length = supplied.len(),
            "shopify_signature_mismatch"
        );
    }

    valid
}

/// Compute the `X-Shopify-Hmac-SHA256` value Shopify would send for `raw_body`.
pub fn compute_signature(secret: &[u8], raw_body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(raw_body);
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
