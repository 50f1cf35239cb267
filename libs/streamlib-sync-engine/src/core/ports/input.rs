// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! External input port buffering
//!
//! Arriving segments rarely line up with the processing frame. The port
//! copies them into a local buffer sized from the aggregated threshold and
//! releases threshold-sized blocks. Metadata offsets are kept relative to
//! the local buffer start through every copy and release.

use super::state::{PortLifecycle, PortState};
use super::timestamp::TimestampTracker;
use crate::core::error::{EngineError, Result};
use crate::core::media_format::MediaFormat;
use crate::core::metadata::{DropReason, MetadataCarrier, MetadataList};
use crate::core::stream::{ChannelArena, StreamFlags, StreamSegment};

/// Buffer size derived from a media format and the aggregated threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequiredSize {
    pub samples_per_channel: usize,
    pub bytes_per_channel: usize,
    /// Samples in one nominal processing frame.
    pub nominal_samples: usize,
    /// A max-samples request smaller than the nominal frame was ignored.
    pub max_samples_rejected: bool,
}

/// What the next consumer in a linked chain still wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownstreamRequirement {
    pub started: bool,
    pub bytes_needed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Bytes per channel copied into the local buffer.
    Copied(usize),
    /// The segment does not continue the buffered data. Nothing was copied;
    /// drain the buffer and offer the segment again.
    Discontinuity,
}

/// A segment being absorbed across one or more calls.
#[derive(Debug, Default)]
pub struct HeldSegment {
    pub segment: StreamSegment,
    /// Bytes per channel already copied out.
    pub consumed: usize,
}

impl HeldSegment {
    pub fn new(segment: StreamSegment) -> Self {
        Self {
            segment,
            consumed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.segment.len().saturating_sub(self.consumed)
    }

    pub fn is_drained(&self) -> bool {
        self.remaining() == 0 && self.segment.metadata.is_empty()
    }
}

#[derive(Debug)]
pub struct ExternalInputPort {
    lifecycle: PortLifecycle,
    media_format: MediaFormat,
    buffer: Option<ChannelArena>,
    metadata: MetadataList,
    flags: StreamFlags,
    timestamps: TimestampTracker,
    nominal_samples: usize,
    max_process_samples: Option<usize>,
    discontinuity_check_enabled: bool,
    eos_pending: bool,
    ts_discontinuity: bool,
    // Bytes per channel handed to the pipeline but not yet compacted away.
    consumed: usize,
}

impl Default for ExternalInputPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalInputPort {
    pub fn new() -> Self {
        Self {
            lifecycle: PortLifecycle::new(),
            media_format: MediaFormat::default(),
            buffer: None,
            metadata: MetadataList::new(),
            flags: StreamFlags::new(),
            timestamps: TimestampTracker::new(),
            nominal_samples: 0,
            max_process_samples: None,
            discontinuity_check_enabled: true,
            eos_pending: false,
            ts_discontinuity: false,
            consumed: 0,
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.lifecycle.index()
    }

    pub fn state(&self) -> PortState {
        self.lifecycle.state()
    }

    pub fn media_format(&self) -> &MediaFormat {
        &self.media_format
    }

    pub fn nominal_samples(&self) -> usize {
        self.nominal_samples
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, ChannelArena::capacity)
    }

    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, ChannelArena::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffered bytes per channel not yet handed to the pipeline.
    pub fn unconsumed(&self) -> usize {
        self.len().saturating_sub(self.consumed)
    }

    pub fn buffered(&self) -> Option<&ChannelArena> {
        self.buffer.as_ref()
    }

    pub fn metadata(&self) -> &MetadataList {
        &self.metadata
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn timestamps(&self) -> &TimestampTracker {
        &self.timestamps
    }

    pub fn is_eos_pending(&self) -> bool {
        self.eos_pending
    }

    pub fn has_pending_discontinuity(&self) -> bool {
        self.ts_discontinuity
    }

    /// A module may ask for more samples than one nominal frame.
    pub fn set_max_process_samples(&mut self, max: Option<usize>) {
        self.max_process_samples = max;
    }

    /// With the check off, discontinuities are logged and buffered anyway.
    pub fn set_discontinuity_check(&mut self, enabled: bool) {
        self.discontinuity_check_enabled = enabled;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn open(&mut self, index: usize) -> Result<()> {
        self.lifecycle.open(index)?;
        tracing::info!("[ExternalInputPort] Opened at index {}", index);
        Ok(())
    }

    pub fn start(&mut self) -> Result<bool> {
        let changed = self.lifecycle.start()?;
        if changed {
            tracing::info!("[ExternalInputPort] {:?} started", self.index());
        }
        Ok(changed)
    }

    /// Stop and discard held data.
    pub fn stop(&mut self) -> bool {
        if !self.lifecycle.stop() {
            return false;
        }
        let discarded = self.flush(DropReason::Dropped);
        tracing::info!(
            "[ExternalInputPort] {:?} stopped, discarded {} bytes/ch",
            self.index(),
            discarded
        );
        true
    }

    /// Flush before the storage is released.
    pub fn close(&mut self) -> bool {
        let index = self.index();
        if !self.lifecycle.close() {
            return false;
        }
        self.flush(DropReason::Dropped);
        self.buffer = None;
        tracing::info!("[ExternalInputPort] {:?} closed", index);
        true
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    /// Size for one processing frame of `threshold_us`.
    ///
    /// A max-samples request wins when it is larger than the nominal frame.
    /// A smaller one is rejected and flagged rather than clamped quietly.
    pub fn compute_required_size(&self, format: &MediaFormat, threshold_us: i64) -> RequiredSize {
        let nominal_samples = format.us_to_samples(threshold_us);
        let mut samples = nominal_samples;
        let mut max_samples_rejected = false;

        if let Some(max) = self.max_process_samples {
            if max >= nominal_samples {
                samples = max;
            } else {
                tracing::warn!(
                    "[ExternalInputPort] max samples {} below nominal {}, using nominal",
                    max,
                    nominal_samples
                );
                max_samples_rejected = true;
            }
        }

        RequiredSize {
            samples_per_channel: samples,
            bytes_per_channel: format.samples_to_bytes(samples),
            nominal_samples,
            max_samples_rejected,
        }
    }

    /// Apply a media format and threshold, resizing storage if needed.
    pub fn configure(&mut self, format: MediaFormat, threshold_us: i64) -> Result<RequiredSize> {
        if !format.is_valid() {
            return Err(EngineError::NotReady(format!(
                "invalid media format {format}"
            )));
        }
        let previous = self.media_format;
        self.media_format = format;
        let size = self.compute_required_size(&format, threshold_us);
        let resized = self.resize_if_needed(&size).inspect_err(|_| {
            self.media_format = previous;
        })?;
        if !resized {
            self.nominal_samples = size.nominal_samples;
        }
        Ok(size)
    }

    /// Reallocate when the size or channel count changed.
    ///
    /// The new storage is allocated before anything is flushed, so a failed
    /// allocation leaves the port exactly as it was.
    pub fn resize_if_needed(&mut self, size: &RequiredSize) -> Result<bool> {
        let channels = self.media_format.channels();
        if let Some(buffer) = &self.buffer {
            if buffer.capacity() == size.bytes_per_channel && buffer.num_channels() == channels {
                return Ok(false);
            }
        }
        if channels == 0 {
            return Err(EngineError::NotReady(
                "no channels in media format".into(),
            ));
        }

        let fresh = ChannelArena::try_new(channels, size.bytes_per_channel)?;
        if self.buffer.is_some() {
            self.flush(DropReason::Dropped);
        }
        self.buffer = Some(fresh);
        self.nominal_samples = size.nominal_samples;

        tracing::info!(
            "[ExternalInputPort] {:?} resized to {} bytes/ch x {} channels (nominal {} samples)",
            self.index(),
            size.bytes_per_channel,
            channels,
            size.nominal_samples
        );
        Ok(true)
    }

    // =========================================================================
    // Buffering
    // =========================================================================

    /// Exact comparison of the incoming timestamp against the extrapolated one.
    pub fn detect_discontinuity(&self, segment: &StreamSegment) -> bool {
        let Some(incoming) = segment.timestamp() else {
            return false;
        };
        match self.timestamps.expected_next(self.len(), &self.media_format) {
            Some(expected) if expected != incoming => {
                tracing::warn!(
                    "[ExternalInputPort] {:?} timestamp discontinuity, expected {} got {}",
                    self.index(),
                    expected,
                    incoming
                );
                true
            }
            _ => false,
        }
    }

    /// Copy as much of `held` as fits, up to `bytes_wanted` per channel.
    pub fn buffer_segment(
        &mut self,
        held: &mut HeldSegment,
        bytes_wanted: usize,
    ) -> Result<BufferOutcome> {
        if self.buffer.is_none() {
            return Err(EngineError::NotReady(
                "input port has no local buffer".into(),
            ));
        }

        if held.consumed == 0 && !held.segment.is_empty() {
            if let Some(ts) = held.segment.timestamp() {
                // An empty buffer only has an extrapolated head, which the arrival replaces.
                if !self.is_empty() && self.detect_discontinuity(&held.segment) {
                    if self.discontinuity_check_enabled {
                        self.ts_discontinuity = true;
                        return Ok(BufferOutcome::Discontinuity);
                    }
                    tracing::debug!(
                        "[ExternalInputPort] {:?} discontinuity check disabled, buffering anyway",
                        self.index()
                    );
                }
                self.timestamps.push(ts, self.len());
            }
        }

        let format = self.media_format;
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(EngineError::NotReady(
                "input port has no local buffer".into(),
            ));
        };
        let local_before = buffer.len();
        let consumed_before = held.consumed;
        let copied = buffer.append_from(&held.segment.buffers, held.consumed, bytes_wanted)?;
        let local_after = buffer.len();
        held.consumed += copied;

        self.absorb_metadata(held, &format, local_before, consumed_before, local_after);

        if held.remaining() == 0 {
            self.flags.end_of_frame |= held.segment.flags.end_of_frame;
            self.flags.erasure |= held.segment.flags.erasure;
        }
        Ok(BufferOutcome::Copied(copied))
    }

    fn absorb_metadata(
        &mut self,
        held: &mut HeldSegment,
        format: &MediaFormat,
        local_before: usize,
        consumed_before: usize,
        local_after: usize,
    ) {
        let consumed_after = format.bytes_to_samples(held.consumed);
        let first_new = self.metadata.len();
        let moved = held
            .segment
            .metadata
            .move_where(&mut self.metadata, |node| node.offset <= consumed_after);
        if moved == 0 {
            return;
        }

        let shift_down = format.bytes_to_samples(consumed_before);
        let shift_up = format.bytes_to_samples(local_before);
        let mut eos_arrived = false;
        for node in self.metadata.iter_mut().skip(first_new) {
            node.rebase_down(shift_down);
            node.offset += shift_up;
            eos_arrived |= node.is_eos();
        }

        if eos_arrived {
            self.eos_pending = true;
            self.flags.marker_eos = true;
            tracing::info!("[ExternalInputPort] {:?} end of stream buffered", self.index());
        }

        // Real data already sits after these gap markers.
        let buffered_samples = format.bytes_to_samples(local_after);
        let mut index = 0;
        let mut seen = 0;
        self.metadata.destroy_where(DropReason::Dropped, |node| {
            let fresh = index >= first_new;
            index += 1;
            let covered = fresh && node.is_data_flow_gap() && node.offset < buffered_samples;
            seen += usize::from(covered);
            covered
        });
        if seen > 0 {
            tracing::debug!(
                "[ExternalInputPort] {:?} dropped {} superseded gap markers",
                self.index(),
                seen
            );
        }
    }

    /// Bytes per channel still wanted before the next process call.
    ///
    /// A linked downstream consumer caps the requirement so data does not
    /// pile up ahead of a stalled chain.
    pub fn bytes_still_needed(&self, downstream: Option<DownstreamRequirement>) -> usize {
        if self.buffer.is_none() || self.flags.end_of_frame {
            return 0;
        }
        let own = self.media_format.samples_to_bytes(self.nominal_samples);
        let required = match downstream {
            Some(d) if !d.started => 0,
            Some(d) => own.min(d.bytes_needed),
            None => own,
        };
        required.saturating_sub(self.unconsumed())
    }

    pub fn free_space(&self, downstream: Option<DownstreamRequirement>) -> usize {
        let Some(buffer) = &self.buffer else {
            return 0;
        };
        self.bytes_still_needed(downstream).min(buffer.free())
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Mark `bytes` per channel as read by the pipeline in place.
    pub fn consume(&mut self, bytes: usize) {
        self.consumed = (self.consumed + bytes).min(self.len());
    }

    /// Copy up to `max_bytes` per channel of unconsumed data into a new
    /// segment together with the metadata inside that span.
    pub fn take_block(&mut self, max_bytes: usize) -> Result<StreamSegment> {
        let format = self.media_format;
        let Some(buffer) = self.buffer.as_ref() else {
            return Err(EngineError::NotReady(
                "input port has no local buffer".into(),
            ));
        };

        let start = self.consumed;
        let n = max_bytes.min(buffer.len().saturating_sub(start));
        let mut block = StreamSegment::new(buffer.num_channels(), n);
        block.buffers.append_from(buffer, start, n)?;
        let drains = start + n == buffer.len();

        let start_samples = format.bytes_to_samples(start);
        let end_samples = format.bytes_to_samples(start + n);
        self.metadata
            .move_where(&mut block.metadata, |node| node.offset <= end_samples);
        block.metadata.subtract_offsets(start_samples);

        block.set_timestamp(self.timestamps.at_offset(start, &format));
        if block.metadata.has_eos() {
            block.flags.marker_eos = true;
            self.eos_pending = self.metadata.has_eos();
            self.flags.marker_eos = self.eos_pending;
        }
        if drains {
            block.flags.end_of_frame = self.flags.end_of_frame;
            block.flags.erasure = self.flags.erasure;
            self.flags.end_of_frame = false;
            self.flags.erasure = false;
        }

        self.consumed += n;
        Ok(block)
    }

    /// Drop the consumed prefix and re-base what remains.
    pub fn compact(&mut self) -> usize {
        let format = self.media_format;
        let Some(buffer) = self.buffer.as_mut() else {
            return 0;
        };
        let n = buffer.consume_front(self.consumed);
        self.consumed = 0;
        if n == 0 {
            return 0;
        }
        self.metadata.subtract_offsets(format.bytes_to_samples(n));
        self.timestamps.on_consume(n, &format);
        if buffer.is_empty() && self.ts_discontinuity {
            tracing::debug!(
                "[ExternalInputPort] {:?} drained ahead of discontinuity",
                self.index()
            );
            self.ts_discontinuity = false;
        }
        n
    }

    /// Discard held data and metadata. Returns the bytes per channel dropped.
    pub fn flush(&mut self, reason: DropReason) -> usize {
        let discarded = self.len();
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
        }
        let destroyed = self.metadata.destroy_all(reason);
        if destroyed > 0 {
            tracing::debug!(
                "[ExternalInputPort] {:?} flush destroyed {} metadata nodes",
                self.index(),
                destroyed
            );
        }
        self.flags.clear();
        self.timestamps.clear();
        self.consumed = 0;
        self.ts_discontinuity = false;
        self.eos_pending = false;
        discarded
    }
}

impl MetadataCarrier for ExternalInputPort {
    fn ledger(&mut self) -> (&mut MetadataList, &mut StreamFlags) {
        (&mut self.metadata, &mut self.flags)
    }
}
