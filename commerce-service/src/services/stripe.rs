//! Stripe client: payment-intent creation and webhook signature
//! verification.

use anyhow::{anyhow, Result};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::utils::signature::{constant_time_eq, hmac_sha256_hex};
use std::time::Duration;

use crate::config::StripeConfig;

/// Maximum accepted age of a webhook signature timestamp.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    config: StripeConfig,
}

/// Subset of the payment-intent object this service consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentMetadata {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentError {
    pub message: Option<String>,
}

/// Webhook envelope: `{"type": ..., "data": {"object": {...}}}`.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: PaymentIntent,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Create a payment intent with `{orderId, userId}` metadata. The
    /// request inherits the operator-configured timeout; cancellation of
    /// the surrounding request drops this future and aborts the call.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        order_id: &str,
        user_id: &str,
    ) -> Result<PaymentIntent> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);
        let amount = amount_minor.to_string();
        let currency_lower = currency.to_lowercase();
        let params = [
            ("amount", amount.as_str()),
            ("currency", currency_lower.as_str()),
            ("metadata[orderId]", order_id),
            ("metadata[userId]", user_id),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&params)
            .send()
            .await
            .map_err(|e| anyhow!("payment intent request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("payment intent response unreadable: {}", e))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Payment intent creation failed");
            return Err(anyhow!("provider returned {}", status));
        }

        let intent: PaymentIntent = serde_json::from_str(&body)
            .map_err(|e| anyhow!("payment intent response malformed: {}", e))?;

        tracing::info!(intent_id = %intent.id, status = %intent.status, "Payment intent created");
        Ok(intent)
    }

    /// Verify the `t=...,v1=...` webhook signature header against the
    /// shared webhook secret: HMAC-SHA256 over `{t}.{payload}`, compared in
    /// constant time, with a bounded clock tolerance.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> Result<bool> {
        self.verify_webhook_signature_at(payload, header, Utc::now().timestamp())
    }

    fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now_secs: i64,
    ) -> Result<bool> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| anyhow!("signature header missing timestamp"))?;
        if candidates.is_empty() {
            return Err(anyhow!("signature header missing v1 signature"));
        }

        if (now_secs - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
            tracing::warn!("webhook signature timestamp outside tolerance");
            return Ok(false);
        }

        let mut signed_payload = Vec::with_capacity(payload.len() + 16);
        signed_payload.extend_from_slice(timestamp.to_string().as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(payload);

        let expected = hmac_sha256_hex(
            self.config.webhook_secret.expose_secret().as_bytes(),
            &signed_payload,
        )?;

        Ok(candidates
            .iter()
            .any(|sig| constant_time_eq(expected.as_bytes(), sig.as_bytes())))
    }

    pub fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        serde_json::from_slice(payload).map_err(|e| anyhow!("invalid webhook payload: {}", e))
    }

    /// Build a signature header for a payload; test-support only.
    #[cfg(test)]
    pub fn sign_webhook_payload(&self, payload: &[u8], timestamp: i64) -> String {
        let mut signed = Vec::new();
        signed.extend_from_slice(timestamp.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let sig = hmac_sha256_hex(
            self.config.webhook_secret.expose_secret().as_bytes(),
            &signed,
        )
        .unwrap();
        format!("t={},v1={}", timestamp, sig)
    }
}
