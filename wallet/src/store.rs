//! Ledger store primitives.
//!
//! The balance records and the append-only transaction log are only ever
//! mutated through these operations, each of which is a single atomic unit:
//! no caller can observe a balance change without its log entry or vice
//! versa. Two backends implement the contract: [`MemStore`] (dev mode and
//! unit tests) and the Postgres store in [`crate::store_pg`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use cowry_common::currency::Currency;
use cowry_common::wallet::{EntryKind, EntryStatus, LedgerEntry, Wallet};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from store operations. `Unavailable` is the only transient class;
/// everything else reflects a stable precondition the caller can act on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet for {0} is not provisioned")]
    WalletNotFound(String),
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientFunds { available: u64, requested: u64 },
    #[error("currency mismatch: sender holds {sender}, recipient holds {recipient}")]
    CurrencyMismatch {
        sender: Currency,
        recipient: Currency,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an atomic top-up credit.
#[derive(Debug)]
pub enum TopUpOutcome {
    /// The reference was fresh; the balance was credited and one log entry
    /// written.
    Credited { wallet: Wallet, entry: LedgerEntry },
    /// The reference was already consumed by an earlier credit. Nothing was
    /// mutated; the original entry is returned so replays stay idempotent.
    AlreadyCredited { entry: LedgerEntry },
}

/// Result of an atomic transfer: both post-commit balance snapshots plus the
/// single log entry recording the movement.
#[derive(Debug)]
pub struct TransferApplied {
    pub sender: Wallet,
    pub recipient: Wallet,
    pub entry: LedgerEntry,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Provision a wallet with balance 0. Returns `None` when one already
    /// exists; a duplicate trigger delivery must never reset a balance.
    async fn create_wallet(&self, uid: &str, currency: Currency)
        -> Result<Option<Wallet>, StoreError>;

    async fn wallet(&self, uid: &str) -> Result<Option<Wallet>, StoreError>;

    /// Atomically credit `amount` to `uid` and append a `topup` entry
    /// carrying `reference`, unless an entry for `reference` already exists.
    async fn credit_topup(
        &self,
        uid: &str,
        amount: u64,
        reference: &str,
        entry_id: &str,
    ) -> Result<TopUpOutcome, StoreError>;

    /// Atomically debit `from`, credit `to`, and append one `transfer`
    /// entry. Fails without mutation when the sender cannot cover `amount`.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        entry_id: &str,
    ) -> Result<TransferApplied, StoreError>;

    /// Log entries where `uid` is a participant, newest first.
    async fn entries_for(&self, uid: &str, limit: usize) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Liveness probe for /health.
    async fn ready(&self) -> bool;
}

// ─── In-memory store ─────────────────────────────────────────────────────────

/// In-memory backend. One mutex over the whole ledger: every operation is
/// trivially atomic and fully serialized. Used for `--database-url`-less dev
/// runs and for the unit-test suites.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    wallets: HashMap<String, Wallet>,
    log: Vec<LedgerEntry>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn create_wallet(
        &self,
        uid: &str,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.wallets.contains_key(uid) {
            return Ok(None);
        }
        let wallet = Wallet {
            uid: uid.to_string(),
            balance: 0,
            currency,
            updated_at: Utc::now(),
        };
        inner.wallets.insert(uid.to_string(), wallet.clone());
        Ok(Some(wallet))
    }

    async fn wallet(&self, uid: &str) -> Result<Option<Wallet>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.wallets.get(uid).cloned())
    }

    async fn credit_topup(
        &self,
        uid: &str,
        amount: u64,
        reference: &str,
        entry_id: &str,
    ) -> Result<TopUpOutcome, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .log
            .iter()
            .find(|e| e.kind == EntryKind::Topup && e.reference.as_deref() == Some(reference))
        {
            return Ok(TopUpOutcome::AlreadyCredited {
                entry: existing.clone(),
            });
        }

        let now = Utc::now();
        let wallet = inner
            .wallets
            .get_mut(uid)
            .ok_or_else(|| StoreError::WalletNotFound(uid.to_string()))?;
        wallet.balance = wallet
            .balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = LedgerEntry {
            id: entry_id.to_string(),
            kind: EntryKind::Topup,
            amount,
            status: EntryStatus::Success,
            sender: None,
            recipient: uid.to_string(),
            reference: Some(reference.to_string()),
            timestamp: now,
        };
        inner.log.push(entry.clone());

        Ok(TopUpOutcome::Credited { wallet, entry })
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        entry_id: &str,
    ) -> Result<TransferApplied, StoreError> {
        let mut inner = self.inner.lock().await;

        let sender = inner
            .wallets
            .get(from)
            .ok_or_else(|| StoreError::WalletNotFound(from.to_string()))?
            .clone();
        let recipient = inner
            .wallets
            .get(to)
            .ok_or_else(|| StoreError::WalletNotFound(to.to_string()))?
            .clone();

        if sender.currency != recipient.currency {
            return Err(StoreError::CurrencyMismatch {
                sender: sender.currency,
                recipient: recipient.currency,
            });
        }
        if sender.balance < amount {
            return Err(StoreError::InsufficientFunds {
                available: sender.balance,
                requested: amount,
            });
        }

        let now = Utc::now();
        {
            let w = inner.wallets.get_mut(from).expect("sender checked above");
            w.balance -= amount;
            w.updated_at = now;
        }
        {
            let w = inner.wallets.get_mut(to).expect("recipient checked above");
            w.balance = w
                .balance
                .checked_add(amount)
                .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
            w.updated_at = now;
        }

        let entry = LedgerEntry {
            id: entry_id.to_string(),
            kind: EntryKind::Transfer,
            amount,
            status: EntryStatus::Success,
            sender: Some(from.to_string()),
            recipient: to.to_string(),
            reference: None,
            timestamp: now,
        };
        inner.log.push(entry.clone());

        Ok(TransferApplied {
            sender: inner.wallets[from].clone(),
            recipient: inner.wallets[to].clone(),
            entry,
        })
    }

    async fn entries_for(&self, uid: &str, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.inner.lock().await;
        // Log is in append order; newest first is a reverse walk.
        Ok(inner
            .log
            .iter()
            .rev()
            .filter(|e| e.is_participant(uid))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ready(&self) -> bool {
        true
    }
}
