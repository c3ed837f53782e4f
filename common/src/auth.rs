use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Claims asserted by the identity provider about one signed-in user.
///
/// The wallet service trusts these (after signature verification) as the
/// only source of caller identity; uids in request bodies are never used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthClaims {
    /// The user's uid at the identity provider.
    pub sub: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a bearer token was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthError {
    Malformed,
    BadSignature,
    Expired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed bearer token"),
            Self::BadSignature => write!(f, "bearer token signature invalid"),
            Self::Expired => write!(f, "bearer token expired"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Mint a bearer token: `<claims-hex>.<signature-hex>`, claims as JSON
/// signed with the identity provider's ed25519 key. Used by the provider
/// and by test harnesses; the service only ever verifies.
pub fn sign_token(claims: &AuthClaims, key: &SigningKey) -> String {
    let body = serde_json::to_vec(claims).expect("claims serialization should not fail");
    let signature = key.sign(&body);
    format!(
        "{}.{}",
        hex_encode(&body),
        hex_encode(&signature.to_bytes())
    )
}

/// Verify a bearer token against the identity provider's verifying key and
/// the current time. Returns the embedded claims on success.
pub fn verify_token(
    token: &str,
    key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<AuthClaims, AuthError> {
    let (body_hex, sig_hex) = token.split_once('.').ok_or(AuthError::Malformed)?;
    let body = hex_decode(body_hex).map_err(|_| AuthError::Malformed)?;
    let sig_bytes = hex_decode(sig_hex).map_err(|_| AuthError::Malformed)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| AuthError::Malformed)?;

    key.verify(&body, &signature)
        .map_err(|_| AuthError::BadSignature)?;

    let claims: AuthClaims = serde_json::from_slice(&body).map_err(|_| AuthError::Malformed)?;
    if claims.expires_at <= now {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

/// Fixed development identity-provider seed, shared by the service's dev
/// fallback and the integration harness. Never use outside dev/test.
#[cfg(feature = "dev")]
pub const DEV_IDENTITY_SEED: [u8; 32] = *b"cowry-dev-identity-provider-seed";

/// The dev identity provider's signing key (trusted-dealer style fallback
/// for running without a real provider).
#[cfg(feature = "dev")]
pub fn dev_identity_signing_key() -> SigningKey {
    SigningKey::from_bytes(&DEV_IDENTITY_SEED)
}

// ─── Hex helpers ─────────────────────────────────────────────────────────────

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("Odd-length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Decode a hex-encoded ed25519 verifying key (as passed on the service
/// command line).
pub fn verifying_key_from_hex(hex: &str) -> Result<VerifyingKey, String> {
    let bytes = hex_decode(hex)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "verifying key must be 32 bytes".to_string())?;
    VerifyingKey::from_bytes(&arr).map_err(|e| format!("invalid verifying key: {e}"))
}
