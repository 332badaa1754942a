// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use cache_proxy_rs::cache::{
    entry::CacheEntry,
    store::{Cache, CacheError, Probe},
};

const LONG_TTL: Duration = Duration::from_secs(3600);

fn request(path: &str) -> Bytes {
    Bytes::from(format!("GET http://h{path} HTTP/1.1\r\nHost: h\r\n\r\n"))
}

#[tokio::test]
async fn get_on_empty_cache_returns_none() {
    let cache = Cache::new(10, LONG_TTL).await;
    assert!(cache.get(&request("/missing")).await.is_none());
    cache.shutdown().await;
}

#[tokio::test]
async fn repeated_get_returns_the_same_entry() {
    let cache = Cache::new(10, LONG_TTL).await;
    let req = request("/a");
    cache.add(CacheEntry::new(req.clone())).await;

    let first = cache.get(&req).await.expect("first get");
    let second = cache.get(&req).await.expect("second get");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.size(), 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn delete_then_get_then_fresh_add() {
    let cache = Cache::new(10, LONG_TTL).await;
    let req = request("/a");
    let old = CacheEntry::new(req.clone());
    cache.add(old.clone()).await;

    cache.delete(&req).await.expect("delete");
    assert!(old.is_deleted());
    assert!(cache.get(&req).await.is_none());
    assert_eq!(cache.size(), 0);

    let fresh = CacheEntry::new(req.clone());
    cache.add(fresh.clone()).await;
    let found = cache.get(&req).await.expect("get after re-add");
    assert!(Arc::ptr_eq(&found, &fresh));
    assert!(!Arc::ptr_eq(&found, &old));
    cache.shutdown().await;
}

#[tokio::test]
async fn delete_of_absent_key_reports_not_found() {
    let cache = Cache::new(10, LONG_TTL).await;
    assert_eq!(
        cache.delete(&request("/missing")).await,
        Err(CacheError::NotFound)
    );
    cache.shutdown().await;
}

#[tokio::test]
async fn size_never_exceeds_capacity() {
    let cache = Cache::new(2, LONG_TTL).await;
    for i in 0..5 {
        cache.add(CacheEntry::new(request(&format!("/{i}")))).await;
        assert!(cache.size() <= 2, "size {} after add {}", cache.size(), i);
    }
    cache.shutdown().await;
}

#[tokio::test]
async fn capacity_one_evicts_the_previous_entry() {
    let cache = Cache::new(1, LONG_TTL).await;
    let first = CacheEntry::new(request("/a"));
    cache.add(first.clone()).await;
    cache.add(CacheEntry::new(request("/b"))).await;

    assert_eq!(cache.size(), 1);
    assert!(first.is_deleted());
    assert!(cache.get(&request("/a")).await.is_none());
    assert!(cache.get(&request("/b")).await.is_some());
    cache.shutdown().await;
}

#[tokio::test]
async fn get_refreshes_lru_position() {
    let cache = Cache::new(2, LONG_TTL).await;
    cache.add(CacheEntry::new(request("/a"))).await;
    cache.add(CacheEntry::new(request("/b"))).await;

    // Touch /a so /b becomes the tail, then push it out with /c.
    let _ = cache.get(&request("/a")).await.expect("touch /a");
    cache.add(CacheEntry::new(request("/c"))).await;

    assert!(cache.get(&request("/a")).await.is_some());
    assert!(cache.get(&request("/b")).await.is_none());
    assert!(cache.get(&request("/c")).await.is_some());
    cache.shutdown().await;
}

#[tokio::test]
async fn probe_is_miss_then_hit() {
    let cache = Cache::new(10, LONG_TTL).await;
    let req = request("/a");

    let Probe::Miss(placeholder) = cache.probe(&req).await else {
        panic!("first probe must miss");
    };
    let Probe::Hit(found) = cache.probe(&req).await else {
        panic!("second probe must hit");
    };
    assert!(Arc::ptr_eq(&placeholder, &found));
    assert_eq!(cache.size(), 1);
    cache.shutdown().await;
}

// The coalescing guarantee: of N racing probes for one key, exactly one is
// told to fetch from the origin.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_probes_produce_exactly_one_miss() {
    let cache = Cache::new(10, LONG_TTL).await;
    let req = request("/hot");

    let probes: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let req = req.clone();
            tokio::spawn(async move { matches!(cache.probe(&req).await, Probe::Miss(_)) })
        })
        .collect();

    let mut misses = 0;
    for probe in probes {
        if probe.await.expect("probe panicked") {
            misses += 1;
        }
    }
    assert_eq!(misses, 1);
    assert_eq!(cache.size(), 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn zero_ttl_expires_on_next_reaper_tick() {
    let cache = Cache::new(10, Duration::ZERO).await;
    let req = request("/a");
    cache.add(CacheEntry::new(req.clone())).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.get(&req).await.is_none());
    assert_eq!(cache.size(), 0);
    cache.shutdown().await;
}

#[tokio::test]
async fn expired_entries_are_reaped() {
    let cache = Cache::new(10, Duration::from_millis(50)).await;
    let req = request("/a");
    cache.add(CacheEntry::new(req.clone())).await;
    assert!(cache.get(&req).await.is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.get(&req).await.is_none());
    assert_eq!(cache.size(), 0);
    cache.shutdown().await;
}

#[tokio::test]
async fn shutdown_retires_every_entry() {
    let cache = Cache::new(10, LONG_TTL).await;
    let kept: Vec<_> = (0..3)
        .map(|i| CacheEntry::new(request(&format!("/{i}"))))
        .collect();
    for entry in &kept {
        cache.add(entry.clone()).await;
    }

    cache.shutdown().await;
    assert_eq!(cache.size(), 0);
    for entry in &kept {
        assert!(entry.is_deleted());
    }
}
