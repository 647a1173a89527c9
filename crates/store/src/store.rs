// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Typed KV/list/sorted-set/pub-sub primitives over a shared store
//! (spec.md §4.1).
//!
//! The concrete backing store (Redis or similar) is an external
//! collaborator the spec never names; [`MemoryStore`] is the in-process
//! stand-in used by the engine and by tests.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// Keyed scalar, list, sorted-set, counter, and pub-sub primitives
/// (spec.md §4.1).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;

    async fn sorted_set_insert(&self, key: &str, member: String, score: i64) -> Result<()>;
    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<()>;
    /// Ascending by score (matches spec.md §6.3 `queue:<backendKind>` ordering).
    async fn sorted_set_range(&self, key: &str) -> Result<Vec<(String, i64)>>;
    async fn sorted_set_rank(&self, key: &str, member: &str) -> Result<Option<usize>>;

    async fn list_push(&self, key: &str, value: String, max_len: Option<usize>) -> Result<()>;
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    /// `INCR key; EXPIRE key ttl` in one atomic step (spec.md §4.2).
    async fn counter_incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

#[derive(Default)]
struct Shard {
    scalars: HashMap<String, Entry>,
    sorted_sets: HashMap<String, Vec<(String, i64)>>,
    lists: HashMap<String, Vec<String>>,
    counters: HashMap<String, (u64, Option<Instant>)>,
}

/// In-memory [`StateStore`]. Single-process stand-in for the shared KV
/// store named in spec.md §1 ("Non-goals": no cluster-wide consensus; a
/// single-writer-per-job-id regime with a shared store for state
/// replication).
pub struct MemoryStore {
    shard: Mutex<Shard>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { shard: Mutex::new(Shard::default()), channels: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.shard.lock().scalars.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut shard = self.shard.lock();
        let now = Instant::now();
        if let Some(entry) = shard.scalars.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
            shard.scalars.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.shard.lock().scalars.remove(key);
        Ok(())
    }

    async fn sorted_set_insert(&self, key: &str, member: String, score: i64) -> Result<()> {
        let mut shard = self.shard.lock();
        let set = shard.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != &member);
        set.push((member, score));
        set.sort_by_key(|(_, s)| *s);
        Ok(())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.shard.lock().sorted_sets.get_mut(key) {
            set.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn sorted_set_range(&self, key: &str) -> Result<Vec<(String, i64)>> {
        Ok(self.shard.lock().sorted_sets.get(key).cloned().unwrap_or_default())
    }

    async fn sorted_set_rank(&self, key: &str, member: &str) -> Result<Option<usize>> {
        let shard = self.shard.lock();
        Ok(shard
            .sorted_sets
            .get(key)
            .and_then(|set| set.iter().position(|(m, _)| m == member)))
    }

    async fn list_push(&self, key: &str, value: String, max_len: Option<usize>) -> Result<()> {
        let mut shard = self.shard.lock();
        let list = shard.lists.entry(key.to_string()).or_default();
        list.push(value);
        if let Some(max) = max_len {
            if list.len() > max {
                let excess = list.len() - max;
                list.drain(..excess);
            }
        }
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.shard.lock().lists.get(key).cloned().unwrap_or_default())
    }

    async fn counter_incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut shard = self.shard.lock();
        let now = Instant::now();
        let entry = shard.counters.entry(key.to_string()).or_insert((0, None));
        let expired = entry.1.map(|exp| exp <= now).unwrap_or(false);
        if expired {
            *entry = (0, None);
        }
        entry.0 += 1;
        if entry.1.is_none() {
            entry.1 = Some(now + ttl);
        }
        Ok(entry.0)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let channels = self.channels.lock();
        if let Some(tx) = channels.get(channel) {
            // No subscribers is not an error; the message is simply dropped.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}

/// Retry a store operation up to 3 times with exponential backoff, per
/// spec.md §4.1 ("retry <= 3, exponential"). On persistent failure the
/// caller must tolerate it rather than aborting in-flight work (spec.md §7).
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < 3 => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                tracing::warn!(attempt, error = %e, "store operation failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
