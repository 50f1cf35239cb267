// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::state::SyncPath;
use crate::core::buffers::CircularBuffer;
use crate::core::error::{EngineError, Result};
use crate::core::media_format::MediaFormat;
use crate::core::metadata::{DropReason, MetadataCarrier, PropagationSpan, propagate};
use crate::core::ports::PortLifecycle;
use crate::core::stream::StreamSegment;

/// Result of forwarding one input straight to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct PassThrough {
    /// Bytes per channel taken from the input.
    pub consumed: usize,
    /// Bytes per channel written, including zero fill.
    pub produced: usize,
    /// The output carries an end of frame.
    pub end_of_frame: bool,
}

/// Ports, ring and timestamp bookkeeping of one synchronized path.
#[derive(Debug)]
pub(super) struct PathState {
    pub path: SyncPath,
    pub input: PortLifecycle,
    pub output: PortLifecycle,
    pub media_format: MediaFormat,
    pub ring: Option<CircularBuffer>,
    /// Set once the path was aligned with zeros, even when none were needed.
    pub zeros_were_padded: bool,
    /// The input already met its threshold this call and is left untouched.
    pub input_unconsumed: bool,
    /// Timestamp of the next frame released from the ring.
    pub cur_out_ts: i64,
    pub ts_valid: bool,
    pub next_expected_ts: Option<i64>,
}

impl PathState {
    pub fn new(path: SyncPath) -> Self {
        Self {
            path,
            input: PortLifecycle::new(),
            output: PortLifecycle::new(),
            media_format: MediaFormat::default(),
            ring: None,
            zeros_were_padded: false,
            input_unconsumed: false,
            cur_out_ts: 0,
            ts_valid: false,
            next_expected_ts: None,
        }
    }

    pub fn buffered(&self) -> usize {
        self.ring.as_ref().map_or(0, CircularBuffer::len)
    }

    pub fn capacity(&self) -> usize {
        self.ring.as_ref().map_or(0, CircularBuffer::capacity)
    }

    pub fn is_ring_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// Size the ring to hold `start_samples_us` of audio. Skipped without a valid format.
    pub fn allocate_ring(&mut self, start_samples_us: i64) -> Result<()> {
        if !self.media_format.is_valid() {
            return Ok(());
        }
        let capacity = self.media_format.us_to_bytes(start_samples_us);
        self.ring = Some(CircularBuffer::new(self.media_format.channels(), capacity)?);
        tracing::info!(
            "[Synchronizer] {} ring of {} bytes/ch ({}us, {})",
            self.path,
            capacity,
            start_samples_us,
            self.media_format
        );
        Ok(())
    }

    pub fn reset_ring(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.reset();
        }
        self.cur_out_ts = 0;
        self.ts_valid = false;
    }

    /// Latch the output timeline onto the first stamped input that carries data.
    pub fn set_first_out_timestamp(&mut self, input: Option<&StreamSegment>) {
        if self.cur_out_ts != 0 {
            return;
        }
        if let Some(input) = input
            && let Some(ts) = input.timestamp()
            && !input.is_empty()
        {
            self.cur_out_ts = ts;
            self.ts_valid = true;
            tracing::debug!("[Synchronizer] {} output timeline starts at {}us", self.path, ts);
        }
    }

    fn ring_mut(&mut self) -> Result<&mut CircularBuffer> {
        let path = self.path;
        self.ring.as_mut().ok_or_else(|| {
            tracing::error!("[Synchronizer] {} ring used before it was allocated", path);
            EngineError::NotReady(format!("{path} ring not allocated"))
        })
    }

    // The oldest bytes were overwritten, so the head of the ring is now later.
    fn absorb_overflow(&mut self, overflow: usize) {
        if overflow == 0 {
            return;
        }
        let overflow_us = self.media_format.bytes_to_us(overflow);
        self.cur_out_ts += overflow_us;
        tracing::debug!(
            "[Synchronizer] {} ring overflow of {} bytes/ch, timeline moved by {}us",
            self.path,
            overflow,
            overflow_us
        );
    }

    /// Append zeros to the tail to cover a timestamp gap.
    pub fn buffer_zeros(&mut self, bytes: usize) -> Result<()> {
        if !self.input.is_open() || bytes == 0 {
            return Ok(());
        }
        let overflow = self.ring_mut()?.write_zeros(bytes);
        self.absorb_overflow(overflow);
        Ok(())
    }

    /// Copy `len` bytes per channel of `input` into the ring.
    ///
    /// Metadata is not carried while buffering. Returns whether an end of
    /// frame was discarded with it.
    pub fn buffer_input(&mut self, input: Option<&mut StreamSegment>, len: usize) -> Result<bool> {
        if !self.input.is_open() || !self.media_format.is_valid() {
            return Ok(false);
        }
        let Some(input) = input else {
            return Ok(false);
        };
        if len == 0 && !input.flags.end_of_frame {
            return Ok(false);
        }

        if len > 0 {
            let overflow = self.ring_mut()?.write_from(&input.buffers, 0, len)?;
            self.absorb_overflow(overflow);
        }

        let dropped = input.metadata.destroy_all(DropReason::Dropped);
        if dropped > 0 {
            tracing::debug!(
                "[Synchronizer] {} dropped {} metadata nodes while buffering",
                self.path,
                dropped
            );
        }
        let eof_dropped = input.flags.end_of_frame;
        input.flags.end_of_frame = false;
        input.flags.marker_eos = false;
        Ok(eof_dropped)
    }

    /// Put zeros ahead of the buffered data until the ring holds `expected` bytes.
    ///
    /// Marks the path as padded even when nothing had to be added.
    pub fn pad_initial_zeros(&mut self, expected: usize) -> Result<()> {
        self.zeros_were_padded = true;
        if !self.input.is_open() {
            return Ok(());
        }
        let zeros = expected.saturating_sub(self.buffered());
        if zeros == 0 {
            tracing::debug!("[Synchronizer] {} already holds {} bytes/ch, no padding", self.path, expected);
            return Ok(());
        }
        let padded = self.ring_mut()?.prepend_zeros(zeros);
        self.cur_out_ts -= self.media_format.bytes_to_us(padded);
        tracing::debug!("[Synchronizer] {} padded {} bytes/ch of leading zeros", self.path, padded);
        Ok(())
    }

    /// Release one threshold-sized frame from the ring into `output`.
    ///
    /// Returns the bytes per channel written. The caller only releases a
    /// frame once the ring holds a full threshold.
    pub fn output_buffered(
        &mut self,
        output: Option<&mut StreamSegment>,
        threshold_bytes: usize,
        threshold_us: i64,
    ) -> Result<usize> {
        if !self.output.is_open() {
            return Ok(0);
        }
        let path = self.path;
        let Some(output) = output else {
            return Err(EngineError::NotReady(format!("{path} output buffer missing")));
        };
        let ring = self.ring_mut()?;
        let available = output.buffers.free().min(ring.len());
        if available < threshold_bytes {
            tracing::error!(
                "[Synchronizer] {} cannot release {} bytes/ch (ring {}, output space {})",
                path,
                threshold_bytes,
                ring.len(),
                output.buffers.free()
            );
            return Err(EngineError::BufferError(format!(
                "{path} has {available} of {threshold_bytes} bytes/ch to release"
            )));
        }
        let copied = ring.read_into(&mut output.buffers, threshold_bytes);

        output.set_timestamp(Some(self.cur_out_ts));
        self.cur_out_ts += threshold_us;
        Ok(copied)
    }

    /// Fill `output` with one threshold of silence flagged as erasure.
    pub fn underrun(&mut self, output: Option<&mut StreamSegment>, threshold_bytes: usize) -> Result<usize> {
        if !self.output.is_open() || !self.input.is_started() || !self.media_format.is_valid() {
            tracing::debug!(
                "[Synchronizer] {} skipping underrun (output {}, input {})",
                self.path,
                self.output.state(),
                self.input.state()
            );
            return Ok(0);
        }
        let path = self.path;
        let Some(output) = output else {
            return Err(EngineError::NotReady(format!("{path} output buffer missing")));
        };
        let bytes = threshold_bytes.min(output.buffers.free());
        if bytes < threshold_bytes {
            tracing::warn!(
                "[Synchronizer] {} underrun limited to {} of {} bytes/ch",
                path,
                bytes,
                threshold_bytes
            );
        }
        let written = output.buffers.append_zeros(bytes);
        output.flags.erasure = true;
        output.set_timestamp(None);
        tracing::debug!("[Synchronizer] {} underrun filled {} bytes/ch", path, written);
        Ok(written)
    }

    /// Copy up to one threshold from `input` to `output`, topping up with
    /// zeros so every frame counts toward the cycle.
    pub fn pass_through(
        &mut self,
        input: &mut StreamSegment,
        output: &mut StreamSegment,
        threshold_bytes: usize,
        threshold_us: i64,
    ) -> Result<PassThrough> {
        let fmt = self.media_format;
        let out_before = output.len();

        let mut to_copy = input.len().min(output.buffers.free());
        if to_copy < threshold_bytes {
            tracing::debug!(
                "[Synchronizer] {} short pass-through of {} bytes/ch",
                self.path,
                to_copy
            );
        } else {
            to_copy = threshold_bytes;
        }
        let consumed = output.buffers.append_from(&input.buffers, 0, to_copy)?;
        let mut produced = consumed;
        if produced < threshold_bytes {
            produced += output.buffers.append_zeros(threshold_bytes - produced);
        }

        let span = PropagationSpan {
            consumed: fmt.bytes_to_samples(consumed),
            produced: fmt.bytes_to_samples(produced),
            out_initial: fmt.bytes_to_samples(out_before),
            input_has_data: consumed > 0,
        };
        let moved = propagate(
            Some(&mut *input as &mut dyn MetadataCarrier),
            output,
            None,
            0,
            span,
        );

        output.flags.end_of_frame = input.flags.end_of_frame;
        output.flags.erasure = input.flags.erasure;
        output.flags.marker_eos = moved.eos_reached_output;
        input.flags.end_of_frame = false;

        if self.ts_valid {
            let ts = input.timestamp().unwrap_or(self.cur_out_ts);
            self.cur_out_ts = ts + threshold_us;
            output.set_timestamp(Some(ts));
        } else {
            output.set_timestamp(input.timestamp());
        }

        Ok(PassThrough {
            consumed,
            produced,
            end_of_frame: output.flags.end_of_frame,
        })
    }
}
