// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{EngineError, Result};
use crate::core::stream::ChannelArena;

/// Fixed-capacity multi-channel ring.
///
/// Writes never fail. When a write does not fit, the oldest bytes are
/// overwritten and the overflow is reported so the caller can move its
/// timestamp forward by the same amount.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    storage: Vec<u8>,
    num_channels: usize,
    capacity: usize,
    read: usize,
    len: usize,
}

impl CircularBuffer {
    pub fn new(num_channels: usize, capacity: usize) -> Result<Self> {
        let total = num_channels
            .checked_mul(capacity)
            .ok_or_else(|| EngineError::ResourceExhausted {
                what: "circular buffer".into(),
                bytes: usize::MAX,
            })?;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(total)
            .map_err(|_| EngineError::ResourceExhausted {
                what: "circular buffer".into(),
                bytes: total,
            })?;
        storage.resize(total, 0);

        Ok(Self {
            storage,
            num_channels,
            capacity,
            read: 0,
            len: 0,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Bytes per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len
    }

    fn write_index(&self) -> usize {
        if self.capacity == 0 {
            0
        } else {
            (self.read + self.len) % self.capacity
        }
    }

    /// Write `n` bytes per channel taken from `src` at `src_offset`.
    ///
    /// Returns the number of old bytes overwritten. The source must carry
    /// the ring's channel count.
    pub fn write_from(&mut self, src: &ChannelArena, src_offset: usize, n: usize) -> Result<usize> {
        if src.num_channels() != self.num_channels {
            return Err(EngineError::BufferError(format!(
                "cannot write {} channels into a {}-channel ring",
                src.num_channels(),
                self.num_channels
            )));
        }
        let n = n.min(src.len().saturating_sub(src_offset));
        Ok(self.write_with(n, |ch, dst, from| {
            dst.copy_from_slice(&src.channel(ch)[src_offset + from..src_offset + from + dst.len()]);
        }))
    }

    /// Write `n` zero bytes per channel at the tail.
    pub fn write_zeros(&mut self, n: usize) -> usize {
        self.write_with(n, |_, dst, _| dst.fill(0))
    }

    // `fill(channel, dst, src_pos)` fills `dst` with source bytes starting at `src_pos`.
    fn write_with<F>(&mut self, n: usize, mut fill: F) -> usize
    where
        F: FnMut(usize, &mut [u8], usize),
    {
        if n == 0 || self.capacity == 0 {
            return 0;
        }

        // Only the newest `capacity` bytes can survive.
        let skip = n.saturating_sub(self.capacity);
        let to_write = n - skip;
        let start = (self.write_index() + skip) % self.capacity;

        for ch in 0..self.num_channels {
            let base = ch * self.capacity;
            let first = to_write.min(self.capacity - start);
            fill(ch, &mut self.storage[base + start..base + start + first], skip);
            if first < to_write {
                let rest = to_write - first;
                fill(ch, &mut self.storage[base..base + rest], skip + first);
            }
        }

        let new_len = self.len + n;
        let overflow = new_len.saturating_sub(self.capacity);
        if overflow > 0 {
            self.read = (self.read + overflow) % self.capacity;
            self.len = self.capacity;
        } else {
            self.len = new_len;
        }
        overflow
    }

    /// Insert zeros ahead of the oldest byte. Limited to free space.
    pub fn prepend_zeros(&mut self, n: usize) -> usize {
        let n = n.min(self.free());
        if n == 0 {
            return 0;
        }
        self.read = (self.read + self.capacity - n) % self.capacity;
        for ch in 0..self.num_channels {
            let base = ch * self.capacity;
            let first = n.min(self.capacity - self.read);
            self.storage[base + self.read..base + self.read + first].fill(0);
            if first < n {
                self.storage[base..base + n - first].fill(0);
            }
        }
        self.len += n;
        n
    }

    /// Move up to `n` bytes per channel from the head into `dst`'s tail.
    pub fn read_into(&mut self, dst: &mut ChannelArena, n: usize) -> usize {
        let n = n.min(self.len).min(dst.free());
        if n == 0 {
            return 0;
        }
        let first = n.min(self.capacity - self.read);
        let mut chunks: Vec<&[u8]> = Vec::with_capacity(self.num_channels);
        for ch in 0..self.num_channels {
            let base = ch * self.capacity;
            chunks.push(&self.storage[base + self.read..base + self.read + first]);
        }
        dst.append_slices(&chunks);

        if first < n {
            let rest = n - first;
            let wrapped: Vec<&[u8]> = (0..self.num_channels)
                .map(|ch| &self.storage[ch * self.capacity..ch * self.capacity + rest])
                .collect();
            dst.append_slices(&wrapped);
        }

        self.read = (self.read + n) % self.capacity;
        self.len -= n;
        n
    }

    /// Discard all content and zero the storage.
    pub fn reset(&mut self) {
        self.storage.fill(0);
        self.read = 0;
        self.len = 0;
    }
}
