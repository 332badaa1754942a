// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-client state machine: receive and parse the request, probe the cache,
//! and either stream an existing entry or fetch from the origin while teeing
//! the bytes to the client and into the cache.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::{
        entry::CacheEntry,
        store::{Cache, Probe},
    },
    cfg::config::BUFFER_SIZE,
    http,
    proxy::io,
};

/// Everything one handler invocation needs; created by the listener,
/// consumed by exactly one worker, dropped at task end (which closes the
/// client socket).
pub struct HandlerContext {
    pub cache: Arc<Cache>,
    pub cancel: CancellationToken,
    pub io_timeout: Duration,
    pub client: TcpStream,
    pub peer: SocketAddr,
}

/// Entry point enqueued on the worker pool. Errors never cross the worker
/// boundary: every failure ends with the placeholder (if any) abandoned and
/// the client socket closed.
pub async fn handle_client(mut ctx: HandlerContext) {
    if let Err(e) = serve(&mut ctx).await {
        warn!("Client {} dropped: {e:#}", ctx.peer);
    }
}

async fn serve(ctx: &mut HandlerContext) -> Result<()> {
    let request = io::read_request(&mut ctx.client, ctx.io_timeout, &ctx.cancel)
        .await
        .context("receive client request")?;
    ensure!(!request.is_empty(), "client closed before sending a request");

    let head = http::parse_request(&request)?;

    if !http::cacheable_request(&head.method) {
        let _ = fetch_origin(ctx, &request, &head.host, None).await?;
        return Ok(());
    }

    let probe = ctx.cache.probe(&request).await;
    match probe {
        Probe::Hit(entry) => {
            info!("Cache hit, start streaming from cache");
            stream_from_cache(ctx, &entry).await
        },
        Probe::Miss(entry) => {
            info!("Cache miss");
            match fetch_origin(ctx, &request, &head.host, Some(&entry)).await {
                Ok(status) if http::cacheable_status(status) => {
                    entry.mark_finished();
                    debug!("Set response to entry");
                    Ok(())
                },
                Ok(_) => {
                    // Forwarded to the client, but an error status is not
                    // worth keeping; waiters see `deleted` and stop.
                    abandon(ctx, &entry).await;
                    Ok(())
                },
                Err(e) => {
                    abandon(ctx, &entry).await;
                    Err(e)
                },
            }
        },
    }
}

/// Terminates a placeholder the origin fetch could not fill: broadcast the
/// terminal state to waiters, then unlink from the cache.
async fn abandon(ctx: &HandlerContext, entry: &Arc<CacheEntry>) {
    entry.mark_deleted();
    let _ = ctx.cache.delete(entry.request()).await;
}

/// The tee loop. Connects to the origin named by the Host header, forwards
/// the request verbatim, then relays the response chunk by chunk to the
/// client, appending each chunk to `entry` when one is given. Returns the
/// origin's status code once `Content-Length` bytes of body have flowed.
async fn fetch_origin(
    ctx: &mut HandlerContext,
    request: &Bytes,
    host_header: &str,
    entry: Option<&Arc<CacheEntry>>,
) -> Result<u16> {
    let http::HostPort { host, port } = http::split_host_port(host_header)?;
    let mut origin = io::connect(&host, port, ctx.io_timeout, &ctx.cancel)
        .await
        .with_context(|| format!("connect to {host}:{port}"))?;

    io::send_all(&mut origin, request, ctx.io_timeout, &ctx.cancel)
        .await
        .context("forward request to origin")?;

    // First burst: relay it as it arrives and keep a copy, the response head
    // with status and Content-Length lives in it.
    let mut first = BytesMut::new();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let received =
            io::read_chunk(&mut origin, &mut buf, ctx.io_timeout, &ctx.cancel).await?;
        if received == 0 {
            break;
        }
        io::send_all(&mut ctx.client, &buf[..received], ctx.io_timeout, &ctx.cancel)
            .await?;
        first.extend_from_slice(&buf[..received]);
        if received < BUFFER_SIZE {
            break;
        }
    }
    ensure!(!first.is_empty(), "origin closed without a response");
    let first = first.freeze();

    let head = http::parse_response(&first)?;
    if let Some(entry) = entry {
        entry.append_segment(first).await;
    }

    let mut body_received = head.body_received;
    while body_received < head.content_length {
        let received =
            io::read_chunk(&mut origin, &mut buf, ctx.io_timeout, &ctx.cancel).await?;
        if received == 0 {
            bail!("origin closed before sending the full body");
        }
        io::send_all(&mut ctx.client, &buf[..received], ctx.io_timeout, &ctx.cancel)
            .await?;
        if let Some(entry) = entry {
            entry.append_segment(Bytes::copy_from_slice(&buf[..received])).await;
        }
        body_received += received;
    }

    Ok(head.status)
}

/// Drains an entry another handler is filling (or has filled). The cursor
/// walk holds no entry lock during socket writes, so a slow client here
/// never stalls the producer or its siblings.
async fn stream_from_cache(ctx: &mut HandlerContext, entry: &Arc<CacheEntry>) -> Result<()> {
    let mut cursor = 0;
    loop {
        let batch = entry.wait_segments(cursor).await;
        for segment in &batch.segments {
            io::send_all(&mut ctx.client, segment, ctx.io_timeout, &ctx.cancel).await?;
        }
        cursor += batch.segments.len();
        if batch.is_terminal() {
            return Ok(());
        }
    }
}
