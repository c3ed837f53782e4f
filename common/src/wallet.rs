use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::Currency;

/// A user's balance record, the single source of truth for how much money
/// they hold. One per user, keyed by the identity provider's uid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub uid: String,
    /// Balance in the currency's minor unit. Never negative.
    pub balance: u64,
    /// Fixed at provisioning time; transfers never cross currencies.
    pub currency: Currency,
    pub updated_at: DateTime<Utc>,
}

/// One entry in the append-only transaction log. Entries are written in the
/// same atomic unit as the balance mutation they record and are never
/// updated or deleted afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub kind: EntryKind,
    /// Amount moved, in minor units. Always positive.
    pub amount: u64,
    pub status: EntryStatus,
    /// Sending uid; absent for top-ups (the money enters from outside).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Receiving uid.
    pub recipient: String,
    /// Gateway checkout reference; present on top-ups only, unique per
    /// successful top-up. The double-credit guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Topup,
    Transfer,
}

/// Entries only exist for mutations that committed, so the only status is
/// `Success`; failed or pending attempts never reach the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
}

impl LedgerEntry {
    /// Signed effect of this entry on `uid`'s balance: credit received minus
    /// debit sent. Zero when `uid` is not a participant.
    pub fn effect_on(&self, uid: &str) -> i64 {
        let mut effect = 0i64;
        if self.recipient == uid {
            effect += self.amount as i64;
        }
        if self.sender.as_deref() == Some(uid) {
            effect -= self.amount as i64;
        }
        effect
    }

    pub fn is_participant(&self, uid: &str) -> bool {
        self.recipient == uid || self.sender.as_deref() == Some(uid)
    }
}

/// Replay a user's ledger entries from account creation (balance 0) to a
/// balance. Ledger/balance consistency means this always equals the stored
/// balance for the full entry set.
pub fn replay_balance<'a>(uid: &str, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries
        .into_iter()
        .fold(0i64, |acc, entry| acc + entry.effect_on(uid))
}
