//! Process-local suppression of repeated webhook sends.
//!
//! The durable guard against re-notifying is the watermark stored on each
//! document. This cache only covers the short window in which two overlapping
//! ticks, or a tick racing a save hook, would otherwise post the same event
//! twice. Entries are lost on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Dedup window used by the deployed notifier.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `key` was recorded and has not expired yet.
    pub fn should_suppress(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        prune_expired(&mut entries, now);
        entries.get(key).is_some_and(|expires_at| *expires_at > now)
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn record(&self, key: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.lock();
        prune_expired(&mut entries, now);
        entries.insert(key.to_string(), now + ttl);
    }

    pub fn prune(&self) {
        let now = Instant::now();
        prune_expired(&mut self.lock(), now);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune_expired(entries: &mut HashMap<String, Instant>, now: Instant) {
    entries.retain(|_, expires_at| *expires_at > now);
}
