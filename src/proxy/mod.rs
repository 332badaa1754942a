// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod handler;
pub(crate) mod io;
pub mod listener;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::{cache::store::Cache, cfg::config::RuntimeConfig, pool::WorkerPool};

/// The proxy: cache, worker pool and the shutdown tokens tying them to the
/// accept loop. `cancel` only stops accepting; in-flight handlers keep
/// their entry handles and run to completion. `kill` aborts handler I/O and
/// stays untouched on the graceful path.
pub struct Proxy {
    pub(crate) cache: Arc<Cache>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) cfg: RuntimeConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) kill: CancellationToken,
}

impl Proxy {
    pub async fn new(cfg: RuntimeConfig) -> Arc<Self> {
        let cache = Cache::new(cfg.cache_capacity, cfg.cache_expiry).await;
        let pool = WorkerPool::new(cfg.workers, cfg.queue_capacity);
        Arc::new(Self {
            cache,
            pool,
            cfg,
            cancel: CancellationToken::new(),
            kill: CancellationToken::new(),
        })
    }

    /// Runs the accept loop on `listener` until shutdown is triggered.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) {
        listener::accept_loop(Arc::clone(self), listener)
            .instrument(info_span!("worker", name = "listener"))
            .await;
    }

    /// Makes the accept loop return. Safe to call from a signal task.
    pub fn trigger_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Hard stop: abort every handler's pending socket I/O as well. Prefer
    /// `trigger_shutdown` + `shutdown`, which let in-flight clients finish.
    pub fn kill_now(&self) {
        self.cancel.cancel();
        self.kill.cancel();
    }

    /// Graceful teardown: drain and join the workers, then stop the reaper
    /// and retire every cache entry. In-flight handlers finish on their own;
    /// entries they still hold stay alive until their handles drop.
    pub async fn shutdown(&self) {
        info!("Destroy handlers");
        self.pool.shutdown().await;
        info!("Destroy cache");
        self.cache.shutdown().await;
        info!("Destroy proxy");
    }

    /// The cache behind this proxy, mainly for tests and introspection.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }
}
