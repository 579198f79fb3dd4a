//! Verdict cache: bounded, time-limited store of recent verdicts
//!
//! Entries expire lazily: an expired entry is dropped the next time it is
//! looked up. When the cache is full, the least-recently-used entry that is
//! not pinned by an in-flight check is evicted before inserting.

use crate::clock::Clock;
use crate::normalize::NormalizedUrl;
use crate::types::Verdict;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug)]
struct CacheEntry {
    verdict: Verdict,
    expires_at: u64,
    last_used: u64,
}

/// LRU verdict cache keyed by normalized URL
///
/// Not internally synchronized: the owner (the verifier, driven by the
/// dispatcher) serializes access.
#[derive(Debug)]
pub struct VerdictCache {
    capacity: usize,
    entries: HashMap<NormalizedUrl, CacheEntry>,
    /// last_used tick → url, oldest first
    recency: BTreeMap<u64, NormalizedUrl>,
    /// url → number of in-flight checks waiting on it
    pinned: HashMap<NormalizedUrl, usize>,
    tick: u64,
    clock: Arc<dyn Clock>,
}

impl VerdictCache {
    /// Create a cache holding at most `capacity` verdicts (minimum 1)
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            pinned: HashMap::new(),
            tick: 0,
            clock,
        }
    }

    /// Look up a fresh verdict, refreshing its recency
    ///
    /// An expired entry counts as a miss and is dropped unless pinned.
    pub fn get(&mut self, url: &NormalizedUrl) -> Option<Verdict> {
        let now = self.clock.now_ms();
        let expired = self.entries.get(url)?.expires_at <= now;

        if expired {
            if !self.is_pinned(url) {
                self.remove(url);
                tracing::debug!(url = %url, "Expired verdict dropped on lookup");
            }
            return None;
        }

        let tick = self.next_tick();
        let entry = self.entries.get_mut(url)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, url.clone());
        Some(entry.verdict.clone())
    }

    /// Insert or replace a verdict
    pub fn put(&mut self, url: NormalizedUrl, verdict: Verdict) {
        if let Some(old) = self.entries.remove(&url) {
            self.recency.remove(&old.last_used);
        } else {
            while self.entries.len() >= self.capacity {
                if self.evict_lru().is_none() {
                    tracing::warn!(
                        url = %url,
                        capacity = self.capacity,
                        "Verdict cache full of pinned entries, inserting over capacity"
                    );
                    break;
                }
            }
        }

        let tick = self.next_tick();
        let expires_at = verdict.expires_at();
        self.recency.insert(tick, url.clone());
        self.entries.insert(
            url,
            CacheEntry {
                verdict,
                expires_at,
                last_used: tick,
            },
        );
    }

    /// Protect a URL's entry from eviction while an in-flight check waits on it
    pub fn pin(&mut self, url: &NormalizedUrl) {
        *self.pinned.entry(url.clone()).or_insert(0) += 1;
    }

    /// Release one pin taken by [`pin`](Self::pin)
    pub fn unpin(&mut self, url: &NormalizedUrl) {
        if let Some(count) = self.pinned.get_mut(url) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(url);
            }
        }
    }

    pub fn is_pinned(&self, url: &NormalizedUrl) -> bool {
        self.pinned.contains_key(url)
    }

    /// Whether an entry exists, fresh or not, without touching recency
    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry; pins survive
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn evict_lru(&mut self) -> Option<NormalizedUrl> {
        let victim = self
            .recency
            .values()
            .find(|url| !self.pinned.contains_key(*url))
            .cloned()?;
        self.remove(&victim);
        tracing::debug!(url = %victim, "Evicted least-recently-used verdict");
        Some(victim)
    }

    fn remove(&mut self, url: &NormalizedUrl) {
        if let Some(entry) = self.entries.remove(url) {
            self.recency.remove(&entry.last_used);
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
