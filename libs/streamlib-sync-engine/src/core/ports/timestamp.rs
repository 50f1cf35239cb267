// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::media_format::MediaFormat;

/// A timestamp pinned to a byte offset (per channel) inside a local buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampInfo {
    pub valid: bool,
    pub timestamp: i64,
    pub offset: usize,
}

impl TimestampInfo {
    fn at(timestamp: i64, offset: usize) -> Self {
        Self {
            valid: true,
            timestamp,
            offset,
        }
    }
}

/// Timestamps for the data held in an input port's local buffer.
///
/// `head` describes the byte at offset 0. `newest` is the latest arrival,
/// pinned to where that arrival's data begins. Keeping both lets a port
/// extrapolate forward from fresh information while still knowing the
/// timestamp of what it delivers next.
///
/// The head is always derived from a received timestamp plus the bytes
/// consumed since, so partial consumes never accumulate rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampTracker {
    head: TimestampInfo,
    anchor: i64,
    consumed_since_anchor: usize,
    newest: TimestampInfo,
}

impl TimestampTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<i64> {
        self.head.valid.then_some(self.head.timestamp)
    }

    pub fn newest(&self) -> Option<TimestampInfo> {
        self.newest.valid.then_some(self.newest)
    }

    /// Record an arrival whose first byte lands at `buffered_len`.
    ///
    /// An empty buffer means the head was only extrapolated, so the incoming
    /// timestamp replaces it.
    pub fn push(&mut self, timestamp: i64, buffered_len: usize) {
        if buffered_len == 0 {
            self.anchor = timestamp;
            self.consumed_since_anchor = 0;
            self.head = TimestampInfo::at(timestamp, 0);
            self.newest = TimestampInfo::default();
        } else {
            self.newest = TimestampInfo::at(timestamp, buffered_len);
        }
    }

    /// Timestamp the next appended byte should carry, if anything is known.
    pub fn expected_next(&self, buffered_len: usize, format: &MediaFormat) -> Option<i64> {
        if !self.head.valid {
            return None;
        }
        if self.newest.valid {
            let distance = buffered_len.saturating_sub(self.newest.offset);
            return Some(self.newest.timestamp + format.bytes_to_us(distance));
        }
        Some(self.from_anchor(buffered_len, format))
    }

    /// Timestamp of the byte `offset` bytes past the head.
    pub fn at_offset(&self, offset: usize, format: &MediaFormat) -> Option<i64> {
        if self.newest.valid && offset >= self.newest.offset {
            return Some(self.newest.timestamp + format.bytes_to_us(offset - self.newest.offset));
        }
        self.head
            .valid
            .then(|| self.from_anchor(offset, format))
    }

    /// `consumed` bytes left the front of the buffer.
    pub fn on_consume(&mut self, consumed: usize, format: &MediaFormat) {
        if consumed == 0 {
            return;
        }

        if self.newest.valid && self.newest.offset <= consumed {
            let past = consumed - self.newest.offset;
            self.anchor_head(self.newest.timestamp, past, format);
            self.newest = TimestampInfo::default();
            return;
        }

        if self.head.valid {
            let total = self.consumed_since_anchor + consumed;
            self.anchor_head(self.anchor, total, format);
        }
        if self.newest.valid {
            self.newest.offset -= consumed;
        }
    }

    fn anchor_head(&mut self, anchor: i64, consumed: usize, format: &MediaFormat) {
        self.anchor = anchor;
        self.consumed_since_anchor = consumed;
        self.head = TimestampInfo::at(anchor + format.bytes_to_us(consumed), 0);
    }

    fn from_anchor(&self, offset: usize, format: &MediaFormat) -> i64 {
        self.anchor + format.bytes_to_us(self.consumed_since_anchor + offset)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
