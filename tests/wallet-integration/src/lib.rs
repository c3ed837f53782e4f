//! End-to-end test support for a running cowry-wallet service.
//!
//! The tests in `tests/` are gated behind the `service-tests` feature and
//! drive a live service over HTTP/WebSocket. Expected setup:
//!
//! 1. `cargo run --bin paystack-stub` (auto-settling gateway on port 8900)
//! 2. `cargo run --bin cowry-wallet -- --paystack-base-url http://localhost:8900`
//!    (no `--auth-key`: the service falls back to the dev identity key this
//!    harness mints tokens with)
//! 3. `cargo test -p cowry-wallet-integration --features service-tests`
//!
//! Point `COWRY_WALLET_URL` elsewhere to run against a Postgres-backed
//! deployment; uids are freshened per run so reruns don't collide.

use chrono::{Duration, Utc};
use cowry_common::auth::{dev_identity_signing_key, sign_token, AuthClaims};

pub mod harness;

/// Base URL of the service under test.
pub fn service_url() -> String {
    std::env::var("COWRY_WALLET_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

/// WebSocket endpoint derived from the service URL.
pub fn ws_url() -> String {
    format!("{}/ws", service_url().replacen("http", "ws", 1))
}

pub fn provisioning_secret() -> String {
    std::env::var("COWRY_PROVISIONING_SECRET").unwrap_or_else(|_| "dev-secret".to_string())
}

/// Mint a bearer token for `uid`, signed with the dev identity key the
/// service trusts when started without `--auth-key`.
pub fn mint_token(uid: &str) -> String {
    let claims = AuthClaims {
        sub: uid.to_string(),
        email: format!("{uid}@example.com"),
        expires_at: Utc::now() + Duration::hours(1),
    };
    sign_token(&claims, &dev_identity_signing_key())
}

/// An already-expired token, for auth rejection tests.
pub fn mint_expired_token(uid: &str) -> String {
    let claims = AuthClaims {
        sub: uid.to_string(),
        email: format!("{uid}@example.com"),
        expires_at: Utc::now() - Duration::hours(1),
    };
    sign_token(&claims, &dev_identity_signing_key())
}

/// A uid unique to this test run, so repeated runs against a persistent
/// store never see each other's wallets.
pub fn fresh_uid(name: &str) -> String {
    format!(
        "{}-{}-{:04x}",
        name,
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}
