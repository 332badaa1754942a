// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! HTTP/1.x head parsing for the forward-proxy path: enough of the request
//! to pick an origin and a cache key, enough of the response to frame the
//! body by Content-Length.

use thiserror::Error;

/// Header cap for request and response heads.
pub const MAX_HEADERS: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("request is partial")]
    PartialRequest,
    #[error("request parsing failed: {0}")]
    BadRequest(httparse::Error),
    #[error("host header not found")]
    MissingHost,
    #[error("response is partial")]
    PartialResponse,
    #[error("response parsing failed: {0}")]
    BadResponse(httparse::Error),
    #[error("status code not found")]
    MissingStatus,
    #[error("content-length header not found")]
    MissingContentLength,
    #[error("invalid content-length value")]
    BadContentLength,
    #[error("invalid host header value")]
    BadHost,
    #[error("invalid port in host header")]
    BadPort,
    #[error("https targets are not supported")]
    HttpsUnsupported,
}

/// The two fields of a client request the proxy acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Raw value of the `Host` header.
    pub host: String,
}

/// The response-head facts needed to frame the tee loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    /// Declared `Content-Length`.
    pub content_length: usize,
    /// Body bytes already present in the parsed buffer past the head.
    pub body_received: usize,
}

/// Origin address extracted from a `Host` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

/// Parses a complete request head and extracts the method and Host header.
pub fn parse_request(raw: &[u8]) -> Result<RequestHead, HttpParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {},
        Ok(httparse::Status::Partial) => return Err(HttpParseError::PartialRequest),
        Err(e) => return Err(HttpParseError::BadRequest(e)),
    }

    let method = req.method.ok_or(HttpParseError::PartialRequest)?.to_string();
    let host = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .ok_or(HttpParseError::MissingHost)?;
    let host = std::str::from_utf8(host.value)
        .map_err(|_| HttpParseError::BadHost)?
        .to_string();

    Ok(RequestHead { method, host })
}

/// Parses a complete response head. `raw` is the first burst read from the
/// origin; whatever follows the head in it counts as `body_received`.
pub fn parse_response(raw: &[u8]) -> Result<ResponseHead, HttpParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let head_len = match resp.parse(raw) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err(HttpParseError::PartialResponse),
        Err(e) => return Err(HttpParseError::BadResponse(e)),
    };

    let status = resp.code.ok_or(HttpParseError::MissingStatus)?;
    let content_length = resp
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .ok_or(HttpParseError::MissingContentLength)?;
    let content_length = std::str::from_utf8(content_length.value)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or(HttpParseError::BadContentLength)?;

    Ok(ResponseHead {
        status,
        content_length,
        body_received: raw.len() - head_len,
    })
}

/// Splits a `Host` header value into host and port. Accepts an optional
/// scheme prefix the way lenient clients send it (`http://example.com:8081`).
/// An `https` scheme is rejected: no TLS path exists, so a plain-TCP connect
/// to 443 would only stall.
pub fn split_host_port(value: &str) -> Result<HostPort, HttpParseError> {
    let value = value.trim();

    let rest = match value.split_once("://") {
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("https") => {
            return Err(HttpParseError::HttpsUnsupported);
        },
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
        Some(_) => return Err(HttpParseError::BadHost),
        None => value,
    };

    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (rest, None),
    };

    let host = host.split('/').next().unwrap_or(host);
    if host.is_empty() {
        return Err(HttpParseError::BadHost);
    }

    let port = match port {
        Some(port) => {
            let port = port.split('/').next().unwrap_or(port);
            port.parse::<u16>().map_err(|_| HttpParseError::BadPort)?
        },
        None => 80,
    };

    Ok(HostPort { host: host.to_string(), port })
}

/// Only GET responses are worth coalescing and caching.
pub fn cacheable_request(method: &str) -> bool {
    method == "GET"
}

/// Error statuses are forwarded but never cached.
pub fn cacheable_status(status: u16) -> bool {
    status < 400
}
