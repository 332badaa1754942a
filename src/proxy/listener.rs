// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{info, warn};

use crate::{
    cfg::config::MAX_PENDING_CONNECTIONS,
    proxy::{
        Proxy,
        handler::{HandlerContext, handle_client},
    },
};

/// Binds the accepting socket on all interfaces with `SO_REUSEADDR` so a
/// restarted proxy can reclaim its port immediately.
pub fn bind(port: u16) -> Result<TcpListener> {
    let socket = TcpSocket::new_v4().context("create server socket")?;
    socket.set_reuseaddr(true).context("set SO_REUSEADDR")?;
    socket
        .bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .with_context(|| format!("bind server socket on port {port}"))?;
    let listener = socket
        .listen(MAX_PENDING_CONNECTIONS)
        .context("listen on server socket")?;

    info!("Proxy listen on port {}", listener.local_addr()?.port());
    Ok(listener)
}

/// Accept loop. Exits when the shutdown token fires; each accepted client is
/// wrapped in a handler context and enqueued on the worker pool.
pub(crate) async fn accept_loop(proxy: Arc<Proxy>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = proxy.cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((client, peer)) => {
                        let _ = client.set_nodelay(true);
                        info!("Accept client {peer}");
                        let ctx = HandlerContext {
                            cache: Arc::clone(&proxy.cache),
                            cancel: proxy.kill.clone(),
                            io_timeout: proxy.cfg.io_timeout,
                            client,
                            peer,
                        };
                        proxy.pool.execute(handle_client(ctx)).await;
                    },
                    Err(e) => warn!("Accept client error: {e}"),
                }
            }
        }
    }
}
