// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use cache_proxy_rs::pool::WorkerPool;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_enqueued_job_runs() {
    let pool = WorkerPool::new(4, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let counter = counter.clone();
        pool.execute(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }

    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_runs_jobs_in_fifo_order() {
    let pool = WorkerPool::new(1, 16);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..8u32 {
        let order = order.clone();
        pool.execute(async move {
            order.lock().expect("order lock").push(i);
        })
        .await;
    }

    pool.shutdown().await;
    assert_eq!(*order.lock().expect("order lock"), (0..8).collect::<Vec<_>>());
}

// Shutdown drains: jobs accepted before shutdown all complete before it
// returns, even slow ones.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_waits_for_accepted_jobs() {
    let pool = WorkerPool::new(2, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let counter = counter.clone();
        pool.execute(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }

    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_after_shutdown_is_a_silent_no_op() {
    let pool = WorkerPool::new(1, 4);
    pool.shutdown().await;

    let counter = Arc::new(AtomicUsize::new(0));
    {
        let counter = counter.clone();
        pool.execute(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_queue_applies_backpressure_without_losing_jobs() {
    let pool = WorkerPool::new(1, 2);
    let counter = Arc::new(AtomicUsize::new(0));

    // More jobs than queue slots; execute() must block rather than drop.
    for _ in 0..10 {
        let counter = counter.clone();
        pool.execute(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }

    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}
