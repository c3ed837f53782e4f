//! Wire types for the wallet service HTTP/WebSocket API, shared between the
//! service and its clients (mobile app, integration harness).

use serde::{Deserialize, Serialize};

use crate::wallet::{LedgerEntry, Wallet};

// ─── Requests ────────────────────────────────────────────────────────────────

/// `POST /topups/initialize`. `amount` is in the account currency's minor
/// unit and must be positive; `email` is shown at the hosted checkout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeTopUpRequest {
    pub amount: i64,
    pub email: String,
}

/// `POST /topups/verify`. `reference` is the gateway's correlation key from
/// initialization; `amount` is what the client believes was charged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyTopUpRequest {
    pub reference: String,
    pub amount: i64,
}

/// `POST /transfers`. The sender is always the authenticated caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub amount: i64,
}

/// `POST /internal/wallets`: provisioning trigger fired by the identity
/// provider on user creation. Not client-facing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub uid: String,
}

/// First frame a client sends on `GET /ws` to authenticate the stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub token: String,
}

// ─── Responses ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeTopUpResponse {
    pub access_code: String,
    pub reference: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyTopUpResponse {
    pub success: bool,
    /// True when this reference had already been credited and the call was a
    /// no-op replay.
    pub already_credited: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub transaction_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateWalletResponse {
    pub created: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_ready: bool,
    pub gateway_configured: bool,
}

/// Error body for every non-2xx response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
}

/// Machine-readable error class. Tells the client whether a retry is safe
/// (`unavailable`) or will just repeat a mistake (`failed-precondition`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    FailedPrecondition,
    Unavailable,
    Internal,
}

// ─── Live events ─────────────────────────────────────────────────────────────

/// Event pushed over the WebSocket subscription: a fresh balance snapshot or
/// a newly appended ledger entry involving the subscriber.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WalletEvent {
    Balance { wallet: Wallet },
    Transaction { entry: LedgerEntry },
}
