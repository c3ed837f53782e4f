//! Postgres ledger store.
//!
//! All money movement happens inside explicit SQL transactions. Row locks
//! are taken with `SELECT … FOR UPDATE`; when a transfer locks both account
//! rows it does so in one statement ordered by uid, so two transfers
//! touching the same pair in opposite directions can never deadlock each
//! other. Serialization conflicts are retried a bounded number of times
//! before surfacing as a transient error. The partial unique index on
//! `(reference) WHERE kind = 'topup'` is the hard double-credit backstop
//! underneath the in-transaction dedup check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cowry_common::currency::Currency;
use cowry_common::wallet::{EntryKind, EntryStatus, LedgerEntry, Wallet};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{info, warn};

use crate::store::{LedgerStore, StoreError, TopUpOutcome, TransferApplied};

/// Bounded retry budget for serialization/deadlock conflicts.
const TXN_RETRIES: u32 = 3;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wallets (
    uid        TEXT PRIMARY KEY,
    balance    BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
    currency   TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL CHECK (kind IN ('topup', 'transfer')),
    amount     BIGINT NOT NULL CHECK (amount > 0),
    status     TEXT NOT NULL DEFAULT 'success',
    sender     TEXT,
    recipient  TEXT NOT NULL,
    reference  TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS ledger_topup_reference
    ON ledger_entries (reference) WHERE kind = 'topup';
CREATE INDEX IF NOT EXISTS ledger_recipient_recent
    ON ledger_entries (recipient, created_at DESC);
CREATE INDEX IF NOT EXISTS ledger_sender_recent
    ON ledger_entries (sender, created_at DESC);
";

/// Internal error carrier so retry classification still sees SQLSTATEs
/// after pool/driver errors are folded together.
#[derive(Debug, Error)]
enum PgError {
    #[error(transparent)]
    Db(#[from] tokio_postgres::Error),
    #[error(transparent)]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error(transparent)]
    Domain(#[from] StoreError),
}

impl PgError {
    fn retryable(&self) -> bool {
        matches!(
            self,
            PgError::Db(e) if matches!(
                e.code(),
                Some(&SqlState::T_R_SERIALIZATION_FAILURE) | Some(&SqlState::T_R_DEADLOCK_DETECTED)
            )
        )
    }

    fn unique_violation(&self) -> bool {
        matches!(self, PgError::Db(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION))
    }

    fn into_store(self) -> StoreError {
        match self {
            PgError::Domain(e) => e,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build a pooled connection from a `postgres://` URL and bootstrap the
    /// schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("invalid database url: {e}")))?;
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("ledger schema ready");
        Ok(())
    }

    async fn credit_topup_once(
        &self,
        uid: &str,
        amount: u64,
        reference: &str,
        entry_id: &str,
    ) -> Result<TopUpOutcome, PgError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let wallet_row = tx
            .query_opt(
                "SELECT uid, balance, currency, updated_at FROM wallets \
                 WHERE uid = $1 FOR UPDATE",
                &[&uid],
            )
            .await?;
        if wallet_row.is_none() {
            return Err(StoreError::WalletNotFound(uid.to_string()).into());
        }

        // Same-transaction dedup: a consumed reference means a replay.
        if let Some(row) = tx
            .query_opt(
                "SELECT id, kind, amount, status, sender, recipient, reference, created_at \
                 FROM ledger_entries WHERE kind = 'topup' AND reference = $1",
                &[&reference],
            )
            .await?
        {
            return Ok(TopUpOutcome::AlreadyCredited {
                entry: row_entry(&row)?,
            });
        }

        let amount_minor = amount as i64;
        let updated = tx
            .query_one(
                "UPDATE wallets SET balance = balance + $2, updated_at = now() \
                 WHERE uid = $1 RETURNING uid, balance, currency, updated_at",
                &[&uid, &amount_minor],
            )
            .await?;
        let inserted = tx
            .query_one(
                "INSERT INTO ledger_entries (id, kind, amount, status, recipient, reference) \
                 VALUES ($1, 'topup', $2, 'success', $3, $4) RETURNING created_at",
                &[&entry_id, &amount_minor, &uid, &reference],
            )
            .await?;
        tx.commit().await?;

        Ok(TopUpOutcome::Credited {
            wallet: row_wallet(&updated)?,
            entry: LedgerEntry {
                id: entry_id.to_string(),
                kind: EntryKind::Topup,
                amount,
                status: EntryStatus::Success,
                sender: None,
                recipient: uid.to_string(),
                reference: Some(reference.to_string()),
                timestamp: inserted.get::<_, DateTime<Utc>>("created_at"),
            },
        })
    }

    async fn transfer_once(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        entry_id: &str,
    ) -> Result<TransferApplied, PgError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Lock both rows in one statement, ordered by uid, so opposing
        // transfers on the same pair always lock in the same order.
        let rows = tx
            .query(
                "SELECT uid, balance, currency, updated_at FROM wallets \
                 WHERE uid = $1 OR uid = $2 ORDER BY uid FOR UPDATE",
                &[&from, &to],
            )
            .await?;

        let locked: Vec<Wallet> = rows
            .iter()
            .map(row_wallet)
            .collect::<Result<_, StoreError>>()?;
        let sender = locked
            .iter()
            .find(|w| w.uid == from)
            .ok_or_else(|| StoreError::WalletNotFound(from.to_string()))?;
        let recipient = locked
            .iter()
            .find(|w| w.uid == to)
            .ok_or_else(|| StoreError::WalletNotFound(to.to_string()))?;

        if sender.currency != recipient.currency {
            return Err(StoreError::CurrencyMismatch {
                sender: sender.currency,
                recipient: recipient.currency,
            }
            .into());
        }
        if sender.balance < amount {
            return Err(StoreError::InsufficientFunds {
                available: sender.balance,
                requested: amount,
            }
            .into());
        }

        let amount_minor = amount as i64;
        let debited = tx
            .query_one(
                "UPDATE wallets SET balance = balance - $2, updated_at = now() \
                 WHERE uid = $1 RETURNING uid, balance, currency, updated_at",
                &[&from, &amount_minor],
            )
            .await?;
        let credited = tx
            .query_one(
                "UPDATE wallets SET balance = balance + $2, updated_at = now() \
                 WHERE uid = $1 RETURNING uid, balance, currency, updated_at",
                &[&to, &amount_minor],
            )
            .await?;
        let inserted = tx
            .query_one(
                "INSERT INTO ledger_entries (id, kind, amount, status, sender, recipient) \
                 VALUES ($1, 'transfer', $2, 'success', $3, $4) RETURNING created_at",
                &[&entry_id, &amount_minor, &from, &to],
            )
            .await?;
        tx.commit().await?;

        Ok(TransferApplied {
            sender: row_wallet(&debited)?,
            recipient: row_wallet(&credited)?,
            entry: LedgerEntry {
                id: entry_id.to_string(),
                kind: EntryKind::Transfer,
                amount,
                status: EntryStatus::Success,
                sender: Some(from.to_string()),
                recipient: to.to_string(),
                reference: None,
                timestamp: inserted.get::<_, DateTime<Utc>>("created_at"),
            },
        })
    }

    async fn topup_entry_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT id, kind, amount, status, sender, recipient, reference, created_at \
                 FROM ledger_entries WHERE kind = 'topup' AND reference = $1",
                &[&reference],
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        row.as_ref().map(row_entry).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn create_wallet(
        &self,
        uid: &str,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        // Creation-only write: a second trigger delivery inserts nothing.
        let row = client
            .query_opt(
                "INSERT INTO wallets (uid, currency) VALUES ($1, $2) \
                 ON CONFLICT (uid) DO NOTHING \
                 RETURNING uid, balance, currency, updated_at",
                &[&uid, &currency.code()],
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        row.as_ref().map(row_wallet).transpose()
    }

    async fn wallet(&self, uid: &str) -> Result<Option<Wallet>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT uid, balance, currency, updated_at FROM wallets WHERE uid = $1",
                &[&uid],
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        row.as_ref().map(row_wallet).transpose()
    }

    async fn credit_topup(
        &self,
        uid: &str,
        amount: u64,
        reference: &str,
        entry_id: &str,
    ) -> Result<TopUpOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.credit_topup_once(uid, amount, reference, entry_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.unique_violation() => {
                    // Lost the insert race to a concurrent replay of the same
                    // reference; hand back the entry that won.
                    return match self.topup_entry_by_reference(reference).await? {
                        Some(entry) => Ok(TopUpOutcome::AlreadyCredited { entry }),
                        None => Err(StoreError::Unavailable(
                            "duplicate reference entry disappeared".to_string(),
                        )),
                    };
                }
                Err(e) if e.retryable() && attempt < TXN_RETRIES => {
                    warn!(uid, reference, attempt, "top-up transaction conflicted, retrying");
                }
                Err(e) => return Err(e.into_store()),
            }
        }
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        entry_id: &str,
    ) -> Result<TransferApplied, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transfer_once(from, to, amount, entry_id).await {
                Ok(applied) => return Ok(applied),
                Err(e) if e.retryable() && attempt < TXN_RETRIES => {
                    warn!(from, to, attempt, "transfer transaction conflicted, retrying");
                }
                Err(e) => return Err(e.into_store()),
            }
        }
    }

    async fn entries_for(&self, uid: &str, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let rows = client
            .query(
                "SELECT id, kind, amount, status, sender, recipient, reference, created_at \
                 FROM ledger_entries WHERE recipient = $1 OR sender = $1 \
                 ORDER BY created_at DESC, id DESC LIMIT $2",
                &[&uid, &(limit as i64)],
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        rows.iter().map(row_entry).collect()
    }

    async fn ready(&self) -> bool {
        match self.pool.get().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn row_wallet(row: &Row) -> Result<Wallet, StoreError> {
    let currency: String = row.get("currency");
    let balance: i64 = row.get("balance");
    Ok(Wallet {
        uid: row.get("uid"),
        balance: balance as u64,
        currency: currency
            .parse()
            .map_err(|e: String| StoreError::Unavailable(format!("corrupt wallet row: {e}")))?,
        updated_at: row.get("updated_at"),
    })
}

fn row_entry(row: &Row) -> Result<LedgerEntry, StoreError> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let amount: i64 = row.get("amount");
    let kind = match kind.as_str() {
        "topup" => EntryKind::Topup,
        "transfer" => EntryKind::Transfer,
        other => {
            return Err(StoreError::Unavailable(format!(
                "corrupt ledger entry kind: {other}"
            )))
        }
    };
    if status != "success" {
        return Err(StoreError::Unavailable(format!(
            "corrupt ledger entry status: {status}"
        )));
    }
    Ok(LedgerEntry {
        id: row.get("id"),
        kind,
        amount: amount as u64,
        status: EntryStatus::Success,
        sender: row.get("sender"),
        recipient: row.get("recipient"),
        reference: row.get("reference"),
        timestamp: row.get("created_at"),
    })
}
