// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::Result;
use crate::core::metadata::{DropReason, MetadataCarrier, MetadataList};
use crate::core::stream::{ChannelArena, StreamFlags};

/// One processing frame of held data with its own ledger.
///
/// `data.len()` is the write extent. Bytes before `read_offset` were
/// already rendered.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub data: ChannelArena,
    pub read_offset: usize,
    pub flags: StreamFlags,
    pub timestamp: i64,
    pub metadata: MetadataList,
}

impl RenderFrame {
    fn new(num_channels: usize, frame_bytes: usize) -> Result<Self> {
        Ok(Self {
            data: ChannelArena::try_new(num_channels, frame_bytes)?,
            read_offset: 0,
            flags: StreamFlags::new(),
            timestamp: 0,
            metadata: MetadataList::new(),
        })
    }

    /// Bytes per channel written but not yet rendered.
    pub fn unread(&self) -> usize {
        self.data.len() - self.read_offset
    }

    pub fn is_full(&self) -> bool {
        self.data.free() == 0
    }

    fn reset(&mut self) {
        self.data.clear();
        self.read_offset = 0;
        self.flags.clear();
        self.timestamp = 0;
    }
}

impl MetadataCarrier for RenderFrame {
    fn ledger(&mut self) -> (&mut MetadataList, &mut StreamFlags) {
        (&mut self.metadata, &mut self.flags)
    }
}

/// Ring of frame slots. Writes fill `write_idx` and spill forward; reads
/// drain from `read_idx`.
#[derive(Debug, Clone)]
pub struct FrameRing {
    frames: Vec<RenderFrame>,
    read_idx: usize,
    write_idx: usize,
    frame_bytes: usize,
}

impl FrameRing {
    pub fn new(num_frames: usize, num_channels: usize, frame_bytes: usize) -> Result<Self> {
        let frames = (0..num_frames)
            .map(|_| RenderFrame::new(num_channels, frame_bytes))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            frames,
            read_idx: 0,
            write_idx: 0,
            frame_bytes,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn read_idx(&self) -> usize {
        self.read_idx
    }

    pub fn write_idx(&self) -> usize {
        self.write_idx
    }

    pub fn read_frame(&self) -> &RenderFrame {
        &self.frames[self.read_idx]
    }

    pub fn read_frame_mut(&mut self) -> &mut RenderFrame {
        &mut self.frames[self.read_idx]
    }

    pub fn write_frame_mut(&mut self) -> &mut RenderFrame {
        &mut self.frames[self.write_idx]
    }

    /// The write cursor wrapped onto the read frame and that frame is full.
    pub fn is_full(&self) -> bool {
        self.write_idx == self.read_idx && self.frames[self.write_idx].is_full()
    }

    /// Unrendered bytes per channel across every frame.
    pub fn held_bytes(&self) -> usize {
        self.frames.iter().map(RenderFrame::unread).sum()
    }

    pub fn advance_write(&mut self) {
        self.write_idx = (self.write_idx + 1) % self.frames.len();
    }

    /// Retire the drained read frame and step to the next one.
    pub fn advance_read(&mut self) {
        self.frames[self.read_idx].reset();
        self.read_idx = (self.read_idx + 1) % self.frames.len();
    }

    /// Point the write cursor at the read frame, used once the ring runs dry mid-frame.
    pub fn snap_write_to_read(&mut self) {
        self.write_idx = self.read_idx;
    }

    /// Discard all held data.
    ///
    /// With `force` every node is destroyed; otherwise stream-associated
    /// end-of-stream nodes are moved to `kept` so they can still leave.
    pub fn flush(&mut self, force: bool, kept: &mut MetadataList) -> usize {
        let discarded = self.held_bytes();
        for frame in self.frames.iter_mut() {
            if force {
                frame.metadata.destroy_all(DropReason::Dropped);
            } else {
                frame.metadata.retain_stream_eos(DropReason::Dropped);
                frame.metadata.move_all(kept);
            }
            frame.reset();
        }
        self.read_idx = 0;
        self.write_idx = 0;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::MetadataNode;

    #[test]
    fn test_held_bytes_and_advance() {
        let mut ring = FrameRing::new(3, 1, 4).unwrap();
        ring.write_frame_mut().data.append_zeros(4);
        ring.advance_write();
        ring.write_frame_mut().data.append_zeros(2);
        assert_eq!(ring.held_bytes(), 6);

        ring.read_frame_mut().read_offset = 4;
        ring.advance_read();
        assert_eq!(ring.read_idx(), 1);
        assert_eq!(ring.held_bytes(), 2);
    }

    #[test]
    fn test_full_when_write_wraps_to_read() {
        let mut ring = FrameRing::new(2, 1, 2).unwrap();
        for _ in 0..2 {
            ring.write_frame_mut().data.append_zeros(2);
            ring.advance_write();
        }
        assert!(ring.is_full());
    }

    #[test]
    fn test_flush_keeps_stream_eos() {
        let mut ring = FrameRing::new(2, 1, 4).unwrap();
        ring.write_frame_mut().data.append_zeros(3);
        ring.write_frame_mut()
            .metadata
            .create(MetadataNode::end_of_stream(1, true));
        ring.write_frame_mut()
            .metadata
            .create(MetadataNode::data_flow_gap(0));

        let mut kept = MetadataList::new();
        assert_eq!(ring.flush(false, &mut kept), 3);
        assert_eq!(kept.len(), 1);
        assert!(kept.has_flushing_eos());
        assert_eq!(ring.held_bytes(), 0);
    }
}
