//! Paystack payment gateway adapter.
//!
//! Thin request/response wrapper over the Paystack REST API: initialize a
//! hosted checkout session, and verify after the fact that a reference was
//! actually captured. Holds no state of its own; the server-side secret key
//! never leaves this process. Failures propagate unchanged to the wallet
//! service, which treats them as transient.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("gateway response malformed: {0}")]
    Malformed(String),
}

/// Checkout session handed back to the client, which completes payment
/// out-of-band in the gateway's hosted UI.
#[derive(Clone, Debug)]
pub struct CheckoutSession {
    pub access_code: String,
    pub reference: String,
}

/// The gateway's authoritative answer about one reference.
#[derive(Clone, Debug)]
pub struct VerifiedCharge {
    /// Gateway charge status; only `"success"` counts as captured.
    pub status: String,
    /// Captured amount in minor units.
    pub amount: i64,
    /// The uid tagged into the session metadata at initialization, if the
    /// gateway echoed it back.
    pub metadata_uid: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout session for `amount`, tagged with the initiating uid
    /// so verification can cross-check who started it.
    async fn initialize(
        &self,
        amount: u64,
        email: &str,
        uid: &str,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Look up the authoritative status and captured amount of `reference`.
    async fn verify(&self, reference: &str) -> Result<VerifiedCharge, GatewayError>;

    /// Whether a usable secret key is configured (reported by /health).
    fn configured(&self) -> bool;
}

// ─── Paystack wire shapes ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    access_code: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    // Paystack echoes metadata back as an object, or as "" when none was
    // attached, so parse leniently.
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

// ─── Live adapter ────────────────────────────────────────────────────────────

pub struct PaystackGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl PaystackGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Unwrap the Paystack `{status, message, data}` envelope or classify the
    /// failure.
    async fn read_envelope<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !envelope.status {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Malformed("missing data field".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize(
        &self,
        amount: u64,
        email: &str,
        uid: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let resp = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&json!({
                "amount": amount,
                "email": email,
                "metadata": { "uid": uid },
            }))
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let data: InitializeData = Self::read_envelope(resp).await?;
        debug!(reference = %data.reference, "checkout session initialized");
        Ok(CheckoutSession {
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedCharge, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let data: VerifyData = Self::read_envelope(resp).await?;
        let metadata_uid = data
            .metadata
            .as_ref()
            .and_then(|m| m.get("uid"))
            .and_then(|u| u.as_str())
            .map(str::to_string);
        Ok(VerifiedCharge {
            status: data.status,
            amount: data.amount,
            metadata_uid,
        })
    }

    fn configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}
