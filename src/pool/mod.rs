// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info_span, warn};

struct Task {
    /// Monotonic within the pool; logging only.
    id: u64,
    job: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
}

/// Fixed set of workers draining a bounded FIFO of jobs.
///
/// `execute` applies backpressure by waiting while the queue is full.
/// Workers dequeue in FIFO order but may complete out of order. `shutdown`
/// closes the queue and joins every worker, so every job that was accepted
/// before the shutdown began runs to completion.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Spawns `workers` workers named `thread-pool-<i>` sharing one bounded
    /// queue of `queue_capacity` jobs.
    pub fn new(workers: usize, queue_capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Task>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = Arc::clone(&rx);
                tokio::spawn(
                    worker_loop(rx)
                        .instrument(info_span!("worker", name = %format!("thread-pool-{i}"))),
                )
            })
            .collect();

        Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            next_id: AtomicU64::new(0),
        })
    }

    /// Enqueues a job, waiting while the queue is full. Returns silently if
    /// the shutdown already began.
    pub async fn execute<F>(&self, job: F)
    where F: Future<Output = ()> + Send + 'static {
        let sender = { self.sender.lock().await.clone() };
        let Some(sender) = sender else {
            warn!("Thread pool execution error: thread pool was shutdown");
            return;
        };

        let task = Task {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            job: Box::pin(job),
        };
        if sender.send(task).await.is_err() {
            warn!("Thread pool execution error: thread pool was shutdown");
        }
    }

    /// Closes the queue so no further job is accepted, then joins every
    /// worker. Workers drain the queue to empty before exiting.
    pub async fn shutdown(&self) {
        let _ = self.sender.lock().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Task>>>) {
    loop {
        // Holding the receiver lock only around the dequeue keeps siblings
        // free to pick up the next job while this one runs.
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else { break };

        debug!("Start executing task {}", task.id);
        task.job.await;
        debug!("Finish executing task {}", task.id);
    }
}
