// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::cache::entry::CacheEntry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache entry not found")]
    NotFound,
}

/// Outcome of the linearized lookup-or-insert on the GET path.
#[derive(Debug)]
pub enum Probe {
    /// An entry for this key already exists; stream from it.
    Hit(Arc<CacheEntry>),
    /// A fresh placeholder was inserted; the caller owns the origin fetch.
    Miss(Arc<CacheEntry>),
}

#[derive(Debug)]
struct CacheNode {
    entry: Arc<CacheEntry>,
    /// Milliseconds since the cache was created; refreshed on every `get`.
    last_used: AtomicU64,
}

impl CacheNode {
    fn new(entry: Arc<CacheEntry>, now_ms: u64) -> Self {
        Self { entry, last_used: AtomicU64::new(now_ms) }
    }

    fn touch(&self, now_ms: u64) {
        self.last_used.store(now_ms, Ordering::Release);
    }
}

/// Bounded key→entry store with LRU eviction and a TTL reaper.
///
/// The hash index is a sharded map, so concurrent `get`s never block each
/// other; LRU order lives in a deque behind a single mutex, most-recent at
/// the front. Lock order: an index shard guard is never held while taking
/// the LRU mutex on the read path, while `delete` takes the LRU mutex first
/// and unlinks index + deque under it so the two stay consistent.
#[derive(Debug)]
pub struct Cache {
    index: DashMap<Bytes, CacheNode>,
    lru: Mutex<VecDeque<Bytes>>,
    size: AtomicUsize,
    capacity: usize,
    expiry: Duration,
    birth: Instant,
    probe_lock: Mutex<()>,
    reaper_cancel: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Creates the store and spawns its reaper task.
    pub async fn new(capacity: usize, expiry: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            index: DashMap::new(),
            lru: Mutex::new(VecDeque::with_capacity(capacity)),
            size: AtomicUsize::new(0),
            capacity,
            expiry,
            birth: Instant::now(),
            probe_lock: Mutex::new(()),
            reaper_cancel: CancellationToken::new(),
            reaper: Mutex::new(None),
        });

        let reaper = tokio::spawn(
            reaper_loop(Arc::clone(&cache))
                .instrument(info_span!("worker", name = "garbage-collector")),
        );
        *cache.reaper.lock().await = Some(reaper);

        cache
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks a key up, refreshing its TTL clock and LRU position on a match.
    /// An entry whose TTL just lapsed may still be returned; the reaper
    /// catches it on its next tick.
    pub async fn get(&self, request: &Bytes) -> Option<Arc<CacheEntry>> {
        let entry = {
            let node = self.index.get(request)?;
            if node.entry.is_deleted() {
                return None;
            }
            node.touch(self.age_ms());
            Arc::clone(&node.entry)
        };

        let mut lru = self.lru.lock().await;
        if let Some(pos) = lru.iter().position(|key| key == request)
            && let Some(key) = lru.remove(pos)
        {
            lru.push_front(key);
        }

        Some(entry)
    }

    /// Linearization point of the GET path: lookup, else insert a
    /// placeholder, atomically with respect to other probes. Two identical
    /// GETs racing here cannot both come out as misses.
    pub async fn probe(&self, request: &Bytes) -> Probe {
        let _probe = self.probe_lock.lock().await;
        if let Some(entry) = self.get(request).await {
            return Probe::Hit(entry);
        }
        let entry = CacheEntry::new(request.clone());
        self.add(Arc::clone(&entry)).await;
        Probe::Miss(entry)
    }

    /// Inserts an entry: hash index first, then LRU front, so the key is
    /// findable before its LRU position exists. Evicts the LRU tail while
    /// over capacity. The key must be absent; `probe` is the only insertion
    /// path on the GET side and guarantees that.
    pub async fn add(&self, entry: Arc<CacheEntry>) {
        let key = entry.request().clone();
        let node = CacheNode::new(entry, self.age_ms());
        let _ = self.index.insert(key.clone(), node);

        {
            let mut lru = self.lru.lock().await;
            lru.push_front(key);
            self.size.fetch_add(1, Ordering::SeqCst);
        }
        debug!("Add new cache entry");

        while self.size() > self.capacity {
            let victim = { self.lru.lock().await.back().cloned() };
            let Some(victim) = victim else { break };
            if self.delete(&victim).await.is_err() {
                // Another task is mid-delete on the same key; let it finish.
                tokio::task::yield_now().await;
            }
        }
    }

    /// Unlinks a key. The entry is marked deleted and broadcast before the
    /// unlink so parked readers observe the terminal state, and it stays
    /// alive until the last handler handle drops. Only the exact node that
    /// was marked is removed; a fresh placeholder racing in under the same
    /// key is left untouched.
    pub async fn delete(&self, request: &Bytes) -> Result<(), CacheError> {
        let marked = {
            let node = self.index.get(request).ok_or(CacheError::NotFound)?;
            node.entry.mark_deleted();
            Arc::clone(&node.entry)
        };

        let mut lru = self.lru.lock().await;
        let removed = self
            .index
            .remove_if(request, |_, node| Arc::ptr_eq(&node.entry, &marked))
            .is_some();
        if removed && let Some(pos) = lru.iter().position(|key| key == request) {
            let _ = lru.remove(pos);
            self.size.fetch_sub(1, Ordering::SeqCst);
        }
        drop(lru);

        debug!("Cache entry removed");
        Ok(())
    }

    /// Stops and joins the reaper, then deletes every remaining entry so any
    /// still-streaming reader terminates.
    pub async fn shutdown(&self) {
        self.reaper_cancel.cancel();
        if let Some(reaper) = self.reaper.lock().await.take() {
            let _ = reaper.await;
        }

        let keys: Vec<Bytes> = self.index.iter().map(|kv| kv.key().clone()).collect();
        for key in keys {
            let _ = self.delete(&key).await;
        }
    }

    fn age_ms(&self) -> u64 {
        u64::try_from(self.birth.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn expiry_ms(&self) -> u64 {
        u64::try_from(self.expiry.as_millis()).unwrap_or(u64::MAX)
    }
}

async fn reaper_loop(cache: Arc<Cache>) {
    info!("Cache garbage collector start");

    // Scan twice per TTL, at most once a second; the floor keeps a zero TTL
    // from spinning a core.
    let tick = (cache.expiry / 2)
        .clamp(Duration::from_millis(1), Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = cache.reaper_cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {},
        }
        debug!("Garbage collector running");

        let now = cache.age_ms();
        let expired: Vec<Bytes> = cache
            .index
            .iter()
            .filter(|kv| {
                now.saturating_sub(kv.value().last_used.load(Ordering::Acquire))
                    >= cache.expiry_ms()
            })
            .map(|kv| kv.key().clone())
            .collect();

        for key in expired {
            // NotFound just means a handler or an eviction got there first.
            let _ = cache.delete(&key).await;
        }
    }

    info!("Cache garbage collector stop");
}
