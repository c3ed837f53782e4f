//! Wallet service orchestration.
//!
//! The four money operations (wallet provisioning, top-up initialization,
//! top-up verification, peer-to-peer transfer) plus the read surface the
//! client UI subscribes to. Every balance mutation goes through one
//! atomic store primitive; this layer does validation, gateway
//! cross-checking, and event publishing around those primitives.

use std::sync::Arc;

use chrono::Utc;
use cowry_common::api::{
    ErrorCode, InitializeTopUpRequest, InitializeTopUpResponse, TransferRequest, TransferResponse,
    VerifyTopUpRequest, VerifyTopUpResponse, WalletEvent,
};
use cowry_common::auth::AuthClaims;
use cowry_common::currency::Currency;
use cowry_common::wallet::{LedgerEntry, Wallet};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::EventHub;
use crate::paystack::{GatewayError, PaymentGateway};
use crate::store::{LedgerStore, StoreError, TopUpOutcome};

/// How many ledger entries `GET /transactions` returns at most.
const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("{0}")]
    StoreUnavailable(String),
}

impl WalletError {
    /// Wire-level error class; tells the client whether a retry can help.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::GatewayUnavailable(_) | Self::StoreUnavailable(_) => ErrorCode::Unavailable,
        }
    }
}

fn map_store(err: StoreError) -> WalletError {
    match err {
        StoreError::Unavailable(msg) => WalletError::StoreUnavailable(msg),
        precondition => WalletError::FailedPrecondition(precondition.to_string()),
    }
}

/// Gateway 4xx answers are stable facts about the reference (unknown,
/// declined); everything else is transient and worth retrying.
fn map_gateway(err: GatewayError) -> WalletError {
    match err {
        GatewayError::Status { status, ref message } if (400..500).contains(&status) => {
            WalletError::FailedPrecondition(format!("gateway rejected request: {message}"))
        }
        other => WalletError::GatewayUnavailable(other.to_string()),
    }
}

fn positive_amount(amount: i64) -> Result<u64, WalletError> {
    if amount <= 0 {
        return Err(WalletError::InvalidArgument(format!(
            "amount must be a positive integer, got {amount}"
        )));
    }
    Ok(amount as u64)
}

/// Ledger entry ids follow the `tx-{timestamp_millis}-{random}` shape.
fn new_entry_id() -> String {
    format!(
        "tx-{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<EventHub>,
    currency: Currency,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            gateway,
            events: Arc::new(EventHub::new()),
            currency,
        }
    }

    pub fn events(&self) -> Arc<EventHub> {
        self.events.clone()
    }

    /// Provisioning trigger: create `uid`'s wallet with balance 0. Returns
    /// whether a wallet was created; an existing wallet is left untouched.
    pub async fn create_wallet(&self, uid: &str) -> Result<bool, WalletError> {
        if uid.trim().is_empty() {
            return Err(WalletError::InvalidArgument("uid is required".to_string()));
        }
        match self
            .store
            .create_wallet(uid, self.currency)
            .await
            .map_err(map_store)?
        {
            Some(wallet) => {
                info!(uid, currency = %wallet.currency, "wallet provisioned");
                self.events.publish(uid, WalletEvent::Balance { wallet });
                Ok(true)
            }
            None => {
                info!(uid, "wallet already provisioned, trigger replay ignored");
                Ok(false)
            }
        }
    }

    /// Open a checkout session with the gateway. Nothing has been paid yet,
    /// so no balance or log mutation happens here.
    pub async fn initialize_topup(
        &self,
        caller: &AuthClaims,
        req: InitializeTopUpRequest,
    ) -> Result<InitializeTopUpResponse, WalletError> {
        let amount = positive_amount(req.amount)?;
        if req.email.trim().is_empty() {
            return Err(WalletError::InvalidArgument(
                "email is required for checkout".to_string(),
            ));
        }

        let session = self
            .gateway
            .initialize(amount, &req.email, &caller.sub)
            .await
            .map_err(map_gateway)?;

        info!(uid = %caller.sub, amount, reference = %session.reference, "top-up initialized");
        Ok(InitializeTopUpResponse {
            access_code: session.access_code,
            reference: session.reference,
        })
    }

    /// Confirm a checkout with the gateway, then atomically credit the
    /// caller and append the `topup` log entry. Replaying a consumed
    /// reference returns the prior success without crediting again.
    pub async fn verify_topup(
        &self,
        caller: &AuthClaims,
        req: VerifyTopUpRequest,
    ) -> Result<VerifyTopUpResponse, WalletError> {
        let amount = positive_amount(req.amount)?;
        if req.reference.trim().is_empty() {
            return Err(WalletError::InvalidArgument(
                "reference is required".to_string(),
            ));
        }

        let charge = self
            .gateway
            .verify(&req.reference)
            .await
            .map_err(map_gateway)?;

        if charge.status != "success" {
            return Err(WalletError::FailedPrecondition(format!(
                "payment not successful (gateway status: {})",
                charge.status
            )));
        }
        if charge.amount != req.amount {
            return Err(WalletError::FailedPrecondition(format!(
                "captured amount {} does not match claimed amount {}",
                charge.amount, req.amount
            )));
        }
        if let Some(session_uid) = &charge.metadata_uid {
            if session_uid != &caller.sub {
                warn!(
                    uid = %caller.sub,
                    reference = %req.reference,
                    "verify attempt on a session initiated by another account"
                );
                return Err(WalletError::FailedPrecondition(
                    "checkout session was initiated by another account".to_string(),
                ));
            }
        }

        match self
            .store
            .credit_topup(&caller.sub, amount, &req.reference, &new_entry_id())
            .await
            .map_err(map_store)?
        {
            TopUpOutcome::Credited { wallet, entry } => {
                info!(
                    uid = %caller.sub,
                    amount,
                    reference = %req.reference,
                    balance = wallet.balance,
                    "top-up credited"
                );
                self.events
                    .publish(&caller.sub, WalletEvent::Balance { wallet });
                self.events
                    .publish(&caller.sub, WalletEvent::Transaction { entry });
                Ok(VerifyTopUpResponse {
                    success: true,
                    already_credited: false,
                })
            }
            TopUpOutcome::AlreadyCredited { entry } => {
                info!(
                    uid = %caller.sub,
                    reference = %req.reference,
                    entry = %entry.id,
                    "top-up reference already credited, replay acknowledged"
                );
                Ok(VerifyTopUpResponse {
                    success: true,
                    already_credited: true,
                })
            }
        }
    }

    /// Move funds from the caller to `req.to` in one atomic unit and append
    /// the single `transfer` log entry.
    pub async fn transfer(
        &self,
        caller: &AuthClaims,
        req: TransferRequest,
    ) -> Result<TransferResponse, WalletError> {
        let amount = positive_amount(req.amount)?;
        if req.to.trim().is_empty() {
            return Err(WalletError::InvalidArgument(
                "recipient uid is required".to_string(),
            ));
        }
        if req.to == caller.sub {
            return Err(WalletError::InvalidArgument(
                "cannot transfer to yourself".to_string(),
            ));
        }

        let applied = self
            .store
            .transfer(&caller.sub, &req.to, amount, &new_entry_id())
            .await
            .map_err(map_store)?;

        info!(
            from = %caller.sub,
            to = %req.to,
            amount,
            entry = %applied.entry.id,
            "transfer committed"
        );

        self.events.publish(
            &caller.sub,
            WalletEvent::Balance {
                wallet: applied.sender,
            },
        );
        self.events.publish(
            &req.to,
            WalletEvent::Balance {
                wallet: applied.recipient,
            },
        );
        for uid in [caller.sub.as_str(), req.to.as_str()] {
            self.events.publish(
                uid,
                WalletEvent::Transaction {
                    entry: applied.entry.clone(),
                },
            );
        }

        Ok(TransferResponse {
            transaction_id: applied.entry.id,
        })
    }

    /// The caller's own balance record.
    pub async fn wallet(&self, caller: &AuthClaims) -> Result<Wallet, WalletError> {
        self.store
            .wallet(&caller.sub)
            .await
            .map_err(map_store)?
            .ok_or_else(|| {
                WalletError::FailedPrecondition(format!(
                    "wallet for {} is not provisioned",
                    caller.sub
                ))
            })
    }

    /// Ledger entries involving the caller, newest first.
    pub async fn transactions(&self, caller: &AuthClaims) -> Result<Vec<LedgerEntry>, WalletError> {
        self.store
            .entries_for(&caller.sub, HISTORY_LIMIT)
            .await
            .map_err(map_store)
    }

    pub async fn store_ready(&self) -> bool {
        self.store.ready().await
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway.configured()
    }
}
