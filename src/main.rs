// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use cache_proxy_rs::{
    cfg::{config::RuntimeConfig, logger::init_logger},
    proxy::{Proxy, listener},
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _logger = init_logger()?;

    let port = std::env::args()
        .nth(1)
        .context("Usage: proxy <port>")?
        .parse::<u16>()
        .context("invalid port")?;

    let cfg = RuntimeConfig::from_env();
    let proxy = Proxy::new(cfg).await;
    info!("Proxy PID: {}", std::process::id());

    let listener = listener::bind(port)?;

    {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("SIGTERM handler installation error: {e}");
                    return;
                },
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
            info!("Wait for the job to complete");
            proxy.trigger_shutdown();
        });
    }

    proxy.run(listener).await;
    proxy.shutdown().await;

    Ok(())
}
