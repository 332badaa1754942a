// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Socket primitives shared by the listener and the handlers: every read and
//! write runs under the per-operation timeout and aborts on shutdown.

use std::{future::Future, time::Duration};

use anyhow::{Result, anyhow};
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::cfg::config::BUFFER_SIZE;

pub(crate) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(anyhow!("{label} failed: {e}")),
                Err(_) => Err(anyhow!("{label} timeout")),
            }
        }
    }
}

/// Resolves and connects to the origin; Nagle off, like every socket here.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TcpStream> {
    let stream = io_with_timeout(
        "connect to origin",
        TcpStream::connect((host, port)),
        io_timeout,
        cancel,
    )
    .await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// One read of at most `buf.len()` bytes. Zero means the peer closed.
pub(crate) async fn read_chunk<S>(
    stream: &mut S,
    buf: &mut [u8],
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    io_with_timeout("read", stream.read(buf), io_timeout, cancel).await
}

/// Writes the whole buffer; short writes are retried by `write_all`.
pub(crate) async fn send_all<S>(
    stream: &mut S,
    data: &[u8],
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    io_with_timeout("write", stream.write_all(data), io_timeout, cancel).await
}

/// Accumulates one request burst: reads `BUFFER_SIZE` chunks until a short
/// read or close. The whole request is assumed to arrive in one such burst
/// (no pipelining).
pub(crate) async fn read_request<S>(
    stream: &mut S,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut data = BytesMut::new();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let received = read_chunk(stream, &mut buf, io_timeout, cancel).await?;
        if received == 0 {
            break;
        }
        data.extend_from_slice(&buf[..received]);
        if received < BUFFER_SIZE {
            break;
        }
    }
    Ok(data.freeze())
}
