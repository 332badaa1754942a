// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::cache::chain::MessageChain;

/// One cached request→response binding.
///
/// A single producer (the handler that missed) appends segments while any
/// number of consumers drain them. `finished` and `deleted` are monotonic
/// 0→1 transitions; after either one no further segment is appended.
/// Every append and every flag transition broadcasts on `ready`.
///
/// Entries are shared: the cache index holds one handle, every streaming
/// handler holds another. The entry outlives the index unlink until the last
/// handle drops.
#[derive(Debug)]
pub struct CacheEntry {
    request: Bytes,
    chain: Mutex<MessageChain>,
    finished: AtomicBool,
    deleted: AtomicBool,
    ready: Notify,
}

/// Snapshot handed to a consumer: the segments past its cursor plus the
/// terminal flags observed *before* the segments were collected, so a
/// consumer never exits with unsent segments pending.
#[derive(Debug)]
pub struct SegmentBatch {
    pub segments: Vec<Bytes>,
    pub finished: bool,
    pub deleted: bool,
}

impl SegmentBatch {
    /// True once the consumer has reached the tail of a terminal entry.
    pub fn is_terminal(&self) -> bool {
        self.segments.is_empty() && (self.finished || self.deleted)
    }
}

impl CacheEntry {
    /// Fresh placeholder: empty chain, `finished = deleted = false`.
    pub fn new(request: Bytes) -> Arc<Self> {
        Arc::new(Self {
            request,
            chain: Mutex::new(MessageChain::new()),
            finished: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            ready: Notify::new(),
        })
    }

    pub fn request(&self) -> &Bytes {
        &self.request
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Publishes one more response segment and wakes every waiter. Appends
    /// after a terminal transition are dropped.
    pub async fn append_segment(&self, part: Bytes) {
        if self.is_finished() || self.is_deleted() {
            return;
        }
        {
            let mut chain = self.chain.lock().await;
            chain.append(part);
        }
        self.ready.notify_waiters();
    }

    /// All bytes delivered from the origin. No-op if `deleted` fired first.
    pub fn mark_finished(&self) {
        if self.is_deleted() {
            return;
        }
        self.finished.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    /// Entry removed from the index or abandoned on origin failure.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    /// Non-blocking snapshot of segments past `cursor`.
    pub async fn snapshot(&self, cursor: usize) -> SegmentBatch {
        let finished = self.is_finished();
        let deleted = self.is_deleted();
        let segments = self.chain.lock().await.segments_from(cursor);
        SegmentBatch { segments, finished, deleted }
    }

    /// Parks until there is a segment past `cursor` or a terminal flag is
    /// set. The `Notified` future is registered before the state is checked,
    /// so a broadcast landing between the check and the await is never lost;
    /// spurious wakeups simply re-check.
    pub async fn wait_segments(&self, cursor: usize) -> SegmentBatch {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.snapshot(cursor).await;
            if !batch.segments.is_empty() || batch.finished || batch.deleted {
                return batch;
            }

            notified.await;
        }
    }

    /// Byte length of the response accumulated so far.
    pub async fn response_len(&self) -> usize {
        self.chain.lock().await.total_len()
    }

    /// Concatenated response bytes accumulated so far.
    pub async fn response_bytes(&self) -> Bytes {
        self.chain.lock().await.concat()
    }
}
