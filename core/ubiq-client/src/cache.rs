//! TTL-scoped in-memory cache.
//!
//! One `TtlCache` instance per bucket (keys, dataset definitions, usage
//! events, memoized FF1 objects), all owned by the client context — there is
//! no process-global state, so tests can run many independent clients.
//!
//! Expiry is checked on read; expired entries are reported as misses but are
//! not eagerly evicted. `len()` deliberately ignores TTL (callers that need
//! an exact live count keep their own counter). Iteration order of
//! `get_all`/`take_all` is insertion order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Thread-safe TTL cache keyed by string.
pub struct TtlCache<V> {
    inner: Arc<RwLock<HashMap<String, Entry<V>>>>,
    next_seq: Arc<AtomicU64>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            next_seq: Arc::clone(&self.next_seq),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a clone of the live value for `key`, treating expired
    /// entries as misses.
    pub async fn get(&self, key: &str) -> Option<V> {
        let map = self.inner.read().await;
        let entry = map.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`, with an absolute expiry `ttl` from now
    /// when given.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let mut map = self.inner.write().await;
        let seq = self.bump_seq();
        map.insert(
            key.into(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
                seq,
            },
        );
    }

    /// Updates the live entry for `key` in place, or inserts a fresh one.
    /// The whole operation holds the write lock, so concurrent merges on
    /// the same key cannot lose updates.
    pub async fn merge_or_insert<F, G>(&self, key: &str, ttl: Option<Duration>, merge: F, make: G)
    where
        F: FnOnce(&mut V),
        G: FnOnce() -> V,
    {
        let mut map = self.inner.write().await;
        match map.get_mut(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => merge(&mut entry.value),
            _ => {
                let seq = self.bump_seq();
                map.insert(
                    key.to_string(),
                    Entry {
                        value: make(),
                        expires_at: ttl.map(|t| Instant::now() + t),
                        seq,
                    },
                );
            }
        }
    }

    /// Copies the live value under `src` to `dst`. The copy gets its own
    /// `ttl`; the source's remaining TTL is not propagated.
    pub async fn copy(&self, src: &str, dst: &str, ttl: Option<Duration>) -> bool {
        let mut map = self.inner.write().await;
        let value = match map.get(src) {
            Some(entry) if !entry.is_expired(Instant::now()) => entry.value.clone(),
            _ => return false,
        };
        let seq = self.bump_seq();
        map.insert(
            dst.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
                seq,
            },
        );
        true
    }

    /// All live entries in insertion order.
    pub async fn get_all(&self) -> Vec<(String, V)> {
        let map = self.inner.read().await;
        let now = Instant::now();
        let mut entries: Vec<_> = map
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
            .into_iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Drains the bucket, returning every entry (expired included) in
    /// insertion order.
    pub async fn take_all(&self) -> Vec<(String, V)> {
        let mut map = self.inner.write().await;
        let mut entries: Vec<_> = map.drain().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries.into_iter().map(|(k, e)| (k, e.value)).collect()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Entry count, ignoring TTL expiry.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    fn bump_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
