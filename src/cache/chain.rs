// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{Bytes, BytesMut};

/// Append-only sequence of immutable response segments.
///
/// The producer appends one segment per origin read; consumers address
/// segments by index and keep their own cursor. A segment, once published,
/// is never mutated, which is what lets consumers send it with no lock held.
#[derive(Debug, Default)]
pub struct MessageChain {
    segments: Vec<Bytes>,
    total_len: usize,
}

impl MessageChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, part: Bytes) {
        self.total_len += part.len();
        self.segments.push(part);
    }

    /// Number of segments published so far.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total byte length across all segments.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Cheap clones (refcount bumps) of every segment past `cursor`.
    pub fn segments_from(&self, cursor: usize) -> Vec<Bytes> {
        self.segments.get(cursor..).unwrap_or_default().to_vec()
    }

    /// Concatenation of the whole chain.
    pub fn concat(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_len);
        for part in &self.segments {
            out.extend_from_slice(part);
        }
        out.freeze()
    }
}
