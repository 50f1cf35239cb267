// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Multi-channel byte storage
//!
//! One allocation holds every channel. Channel `n` starts at
//! `n * capacity` while unpacked, or at `n * len` once [`ChannelArena::pack`]
//! has compacted the channels for delivery. All channels share a single
//! fill level, so they can never disagree about their length.

use super::super::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelArena {
    data: Vec<u8>,
    num_channels: usize,
    capacity: usize,
    len: usize,
    packed: bool,
}

impl ChannelArena {
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![0; num_channels * capacity],
            num_channels,
            capacity,
            len: 0,
            packed: false,
        }
    }

    /// Like [`ChannelArena::new`] but reports allocation failure instead of aborting.
    pub fn try_new(num_channels: usize, capacity: usize) -> Result<Self> {
        let total = num_channels.checked_mul(capacity).ok_or_else(|| {
            EngineError::ResourceExhausted {
                what: format!("{num_channels} channels x {capacity} bytes"),
                bytes: usize::MAX,
            }
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| EngineError::ResourceExhausted {
                what: format!("{num_channels} channel arena"),
                bytes: total,
            })?;
        data.resize(total, 0);

        Ok(Self {
            data,
            num_channels,
            capacity,
            len: 0,
            packed: false,
        })
    }

    /// Build a filled arena from per-channel slices. The shortest slice wins.
    pub fn from_channels(channels: &[&[u8]]) -> Self {
        let len = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut arena = Self::new(channels.len(), len);
        for (ch, src) in channels.iter().enumerate() {
            arena.data[ch * len..(ch + 1) * len].copy_from_slice(&src[..len]);
        }
        arena.len = len;
        arena
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Maximum bytes per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Filled bytes per channel.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    fn stride(&self) -> usize {
        if self.packed { self.len } else { self.capacity }
    }

    /// Filled bytes of one channel.
    pub fn channel(&self, ch: usize) -> &[u8] {
        let base = ch * self.stride();
        &self.data[base..base + self.len]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [u8] {
        self.unpack();
        let base = ch * self.capacity;
        &mut self.data[base..base + self.len]
    }

    /// Truncate or extend the fill level. Extension exposes whatever bytes were there.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity {
            return Err(EngineError::BufferError(format!(
                "length {len} exceeds capacity {}",
                self.capacity
            )));
        }
        self.unpack();
        self.len = len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.packed = false;
    }

    /// Append up to `max` bytes per channel from `src` starting at `src_offset`.
    ///
    /// Both arenas must carry the same number of channels.
    pub fn append_from(&mut self, src: &ChannelArena, src_offset: usize, max: usize) -> Result<usize> {
        if src.num_channels != self.num_channels {
            return Err(EngineError::BufferError(format!(
                "cannot append {} channels into {}",
                src.num_channels, self.num_channels
            )));
        }
        let available = src.len.saturating_sub(src_offset);
        let n = max.min(available).min(self.free());
        if n == 0 {
            return Ok(0);
        }
        self.unpack();
        for ch in 0..self.num_channels {
            let dst = ch * self.capacity + self.len;
            self.data[dst..dst + n].copy_from_slice(&src.channel(ch)[src_offset..src_offset + n]);
        }
        self.len += n;
        Ok(n)
    }

    /// Append the same byte run to every channel's tail, one slice per channel.
    pub fn append_slices(&mut self, channels: &[&[u8]]) -> usize {
        let n = channels
            .iter()
            .map(|c| c.len())
            .min()
            .unwrap_or(0)
            .min(self.free());
        if n == 0 {
            return 0;
        }
        self.unpack();
        for (ch, src) in channels.iter().enumerate().take(self.num_channels) {
            let dst = ch * self.capacity + self.len;
            self.data[dst..dst + n].copy_from_slice(&src[..n]);
        }
        self.len += n;
        n
    }

    pub fn append_zeros(&mut self, max: usize) -> usize {
        let n = max.min(self.free());
        if n == 0 {
            return 0;
        }
        self.unpack();
        for ch in 0..self.num_channels {
            let dst = ch * self.capacity + self.len;
            self.data[dst..dst + n].fill(0);
        }
        self.len += n;
        n
    }

    /// Drop `n` bytes from the front of every channel, shifting the rest down.
    pub fn consume_front(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        if n == 0 {
            return 0;
        }
        self.unpack();
        let remaining = self.len - n;
        for ch in 0..self.num_channels {
            let base = ch * self.capacity;
            self.data.copy_within(base + n..base + self.len, base);
        }
        self.len = remaining;
        n
    }

    /// Insert `n` zero bytes ahead of the existing data in every channel.
    pub fn prepend_zeros(&mut self, n: usize) -> usize {
        let n = n.min(self.free());
        if n == 0 {
            return 0;
        }
        self.unpack();
        for ch in 0..self.num_channels {
            let base = ch * self.capacity;
            self.data.copy_within(base..base + self.len, base + n);
            self.data[base..base + n].fill(0);
        }
        self.len += n;
        n
    }

    /// Compact channels so the filled bytes are contiguous, returning them.
    pub fn pack(&mut self) -> &[u8] {
        if !self.packed {
            for ch in 1..self.num_channels {
                let from = ch * self.capacity;
                self.data.copy_within(from..from + self.len, ch * self.len);
            }
            self.packed = true;
        }
        &self.data[..self.len * self.num_channels]
    }

    // Reverse of pack. Walk backwards so no channel overwrites one not yet moved.
    fn unpack(&mut self) {
        if !self.packed {
            return;
        }
        for ch in (1..self.num_channels).rev() {
            let from = ch * self.len;
            self.data.copy_within(from..from + self.len, ch * self.capacity);
        }
        self.packed = false;
    }

    /// Bytes held across all channels.
    pub fn total_len(&self) -> usize {
        self.len * self.num_channels
    }
}
