// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt::Display, str::FromStr, time::Duration};

use tracing::warn;

/// Chunk size for every socket read and for the client-request burst.
pub const BUFFER_SIZE: usize = 4096;
/// Maximum number of live cache entries before LRU eviction kicks in.
pub const CACHE_CAPACITY: usize = 100;
/// Capacity of the worker pool task queue.
pub const TASK_QUEUE_CAPACITY: usize = 100;
/// Listen backlog of the accepting socket.
pub const MAX_PENDING_CONNECTIONS: u32 = 10;
/// Per-operation timeout applied to every socket read and write.
pub const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

const THREAD_POOL_SIZE_ENV: &str = "CACHE_PROXY_THREAD_POOL_SIZE";
const CACHE_EXPIRED_TIME_MS_ENV: &str = "CACHE_PROXY_CACHE_EXPIRED_TIME_MS";

const THREAD_POOL_SIZE_DEFAULT: usize = 1;
const CACHE_EXPIRED_TIME_MS_DEFAULT: u64 = 24 * 60 * 60 * 1000;

/// Runtime parameters of the proxy. The two knobs exposed through the
/// environment are the worker count and the cache TTL; everything else keeps
/// its compile-time default and exists as a field so tests can shrink it.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of connection-handler workers.
    pub workers: usize,
    /// TTL of a cache entry, measured from its last access.
    pub cache_expiry: Duration,
    /// Maximum number of live cache entries.
    pub cache_capacity: usize,
    /// Capacity of the bounded task queue feeding the workers.
    pub queue_capacity: usize,
    /// Timeout for a single socket read or write.
    pub io_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: THREAD_POOL_SIZE_DEFAULT,
            cache_expiry: Duration::from_millis(CACHE_EXPIRED_TIME_MS_DEFAULT),
            cache_capacity: CACHE_CAPACITY,
            queue_capacity: TASK_QUEUE_CAPACITY,
            io_timeout: READ_WRITE_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Reads `CACHE_PROXY_THREAD_POOL_SIZE` and
    /// `CACHE_PROXY_CACHE_EXPIRED_TIME_MS`. Unset variables silently keep the
    /// default; unparsable or non-positive values log a warning and fall back.
    pub fn from_env() -> Self {
        let workers = env_value(THREAD_POOL_SIZE_ENV, THREAD_POOL_SIZE_DEFAULT, |n: i64| {
            usize::try_from(n).ok().filter(|n| *n > 0)
        });
        let expiry_ms = env_value(
            CACHE_EXPIRED_TIME_MS_ENV,
            CACHE_EXPIRED_TIME_MS_DEFAULT,
            Some,
        );

        Self {
            workers,
            cache_expiry: Duration::from_millis(expiry_ms),
            ..Self::default()
        }
    }
}

fn env_value<R, T, F>(name: &str, default: T, validate: F) -> T
where
    R: FromStr,
    R::Err: Display,
    F: FnOnce(R) -> Option<T>,
{
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    let parsed = match raw.trim().parse::<R>() {
        Ok(v) => v,
        Err(e) => {
            warn!("{name} getting error: {e}");
            return default;
        },
    };
    match validate(parsed) {
        Some(v) => v,
        None => {
            warn!("{name} getting error: value is out of range");
            default
        },
    }
}
