// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{ChannelArena, StreamFlags};
use crate::core::metadata::{MetadataCarrier, MetadataList};

/// One message worth of channel data crossing a port boundary.
#[derive(Debug, Default)]
pub struct StreamSegment {
    pub buffers: ChannelArena,
    pub flags: StreamFlags,
    /// Microseconds. Only meaningful when `flags.timestamp_valid` is set.
    pub timestamp: i64,
    pub metadata: MetadataList,
}

impl StreamSegment {
    /// Empty segment able to hold `capacity` bytes per channel.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            buffers: ChannelArena::new(num_channels, capacity),
            ..Default::default()
        }
    }

    /// Filled segment carrying `channels`, stamped with `timestamp` when given.
    pub fn from_channels(channels: &[&[u8]], timestamp: Option<i64>) -> Self {
        let mut flags = StreamFlags::new();
        flags.timestamp_valid = timestamp.is_some();
        Self {
            buffers: ChannelArena::from_channels(channels),
            flags,
            timestamp: timestamp.unwrap_or(0),
            metadata: MetadataList::new(),
        }
    }

    /// Bytes per channel.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn max_len(&self) -> usize {
        self.buffers.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn num_channels(&self) -> usize {
        self.buffers.num_channels()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.flags.timestamp_valid.then_some(self.timestamp)
    }

    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.flags.timestamp_valid = timestamp.is_some();
        self.timestamp = timestamp.unwrap_or(0);
    }

    /// No payload and no metadata left to deliver.
    pub fn is_vacant(&self) -> bool {
        self.buffers.is_empty() && self.metadata.is_empty()
    }
}

impl MetadataCarrier for StreamSegment {
    fn ledger(&mut self) -> (&mut MetadataList, &mut StreamFlags) {
        (&mut self.metadata, &mut self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_channels_sets_timestamp() {
        let seg = StreamSegment::from_channels(&[&[1, 2], &[3, 4]], Some(1_000));
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.num_channels(), 2);
        assert_eq!(seg.timestamp(), Some(1_000));

        let seg = StreamSegment::from_channels(&[&[1]], None);
        assert_eq!(seg.timestamp(), None);
    }

    #[test]
    fn test_vacant() {
        let seg = StreamSegment::new(2, 16);
        assert!(seg.is_vacant());
        assert_eq!(seg.max_len(), 16);
    }
}
