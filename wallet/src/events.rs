//! Live wallet event fan-out.
//!
//! The Firestore-style "watch this document" subscriptions become broadcast
//! channels keyed by uid: the service publishes a balance snapshot and the
//! new ledger entry after every committed mutation, and each WebSocket
//! subscriber drains its own receiver. Dropping a receiver just stops that
//! subscription; the ledger itself is untouched.

use cowry_common::api::WalletEvent;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Buffered events per subscriber before lagging kicks in. A lagging UI
/// resubscribes and re-reads the snapshot endpoints, so small is fine.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct EventHub {
    channels: DashMap<String, broadcast::Sender<WalletEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription for `uid`. Events published after this call are
    /// delivered; there is no replay of earlier ones.
    pub fn subscribe(&self, uid: &str) -> broadcast::Receiver<WalletEvent> {
        self.channels
            .entry(uid.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to `uid`'s subscribers, if any.
    pub fn publish(&self, uid: &str, event: WalletEvent) {
        let stale = match self.channels.get(uid) {
            Some(tx) => tx.send(event).is_err(),
            None => return,
        };
        // No receivers left: drop the channel. A subscriber racing this
        // cleanup sees its stream end and simply resubscribes.
        if stale {
            self.channels.remove(uid);
        }
    }
}
