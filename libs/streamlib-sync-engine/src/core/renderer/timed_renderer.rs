// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::counters::{ErrorCounters, RendererFault};
use super::decision::{RenderDecision, RenderOutcome, RendererStats};
use crate::core::buffers::FrameRing;
use crate::core::clocks::Clock;
use crate::core::config::RendererConfig;
use crate::core::error::{EngineError, Result};
use crate::core::events::{self, EngineEvent, EventSink};
use crate::core::media_format::MediaFormat;
use crate::core::metadata::{
    DropReason, MetadataCarrier, MetadataList, MetadataPayload, PacketToken, PropagationSpan,
    propagate,
};
use crate::core::stream::StreamSegment;

fn is_render_time(payload: &MetadataPayload) -> bool {
    matches!(payload, MetadataPayload::TargetRenderTime { .. })
}

/// Consume the input's ledger and flags without carrying them anywhere.
fn drop_input_metadata(input: Option<&mut StreamSegment>) {
    if let Some(input) = input {
        input.flags.end_of_frame = false;
        input.flags.marker_eos = false;
        input.flags.erasure = false;
        input.metadata.destroy_all(DropReason::Dropped);
    }
}

/// Holds audio until its target render time, then releases one frame per
/// timer trigger.
///
/// A call with an output is a timer trigger and the only point where a
/// render decision is made. A call with only an input is a data trigger
/// that just buffers.
pub struct TimedRenderer {
    config: RendererConfig,
    format: MediaFormat,
    clock: Arc<dyn Clock>,
    events: Box<dyn EventSink>,
    ring: Option<FrameRing>,

    frame_duration_us: i64,
    frame_bytes: usize,

    decision: RenderDecision,
    curr_ttr_us: i64,
    first_ttr_received: bool,
    wall_clock_at_trigger_us: i64,

    /// Silence still owed ahead of the held data.
    remaining_zeros_to_pad_us: i64,
    /// Input still to discard after a resync found too much held.
    input_bytes_to_drop: usize,

    counters: ErrorCounters,
    stats: RendererStats,
}

impl std::fmt::Debug for TimedRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedRenderer")
            .field("format", &self.format)
            .field("frame_duration_us", &self.frame_duration_us)
            .field("decision", &self.decision)
            .field("curr_ttr_us", &self.curr_ttr_us)
            .field("bytes_held", &self.bytes_held())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TimedRenderer {
    pub fn new(
        config: RendererConfig,
        format: MediaFormat,
        clock: Arc<dyn Clock>,
        events: Box<dyn EventSink>,
    ) -> Self {
        let counters = ErrorCounters::new(config.error_log_interval_us);
        Self {
            config,
            format,
            clock,
            events,
            ring: None,
            frame_duration_us: 0,
            frame_bytes: 0,
            decision: RenderDecision::Pending,
            curr_ttr_us: 0,
            first_ttr_received: false,
            wall_clock_at_trigger_us: 0,
            remaining_zeros_to_pad_us: 0,
            input_bytes_to_drop: 0,
            counters,
            stats: RendererStats::default(),
        }
    }

    pub fn decision(&self) -> RenderDecision {
        self.decision
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Cached render time, once one with token P1 was accepted.
    pub fn render_time(&self) -> Option<i64> {
        self.first_ttr_received.then_some(self.curr_ttr_us)
    }

    pub fn remaining_prebuffer_us(&self) -> i64 {
        self.remaining_zeros_to_pad_us
    }

    /// Unrendered bytes per channel across the ring.
    pub fn bytes_held(&self) -> usize {
        self.ring.as_ref().map_or(0, FrameRing::held_bytes)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        if !format.is_valid() {
            return Err(EngineError::BadParam {
                id: "renderer media format".into(),
                reason: format!("unsupported format {format}"),
            });
        }
        if format == self.format {
            return Ok(());
        }
        self.format = format;
        tracing::info!("[TimedRenderer] Media format {}", format);
        self.allocate()
    }

    /// Set the processing frame. Reallocates the ring only when it changes.
    pub fn set_frame_duration(&mut self, duration_us: u32) -> Result<()> {
        let duration_us = i64::from(duration_us);
        if duration_us == self.frame_duration_us {
            return Ok(());
        }
        self.frame_duration_us = duration_us;
        tracing::info!("[TimedRenderer] Frame duration {}us", duration_us);
        // One frame of prebuffer plus half a frame of jitter.
        events::raise(
            self.events.as_mut(),
            EngineEvent::AlgorithmicDelayChanged {
                delay_us: duration_us * 3 / 2,
            },
        );
        self.allocate()
    }

    fn allocate(&mut self) -> Result<()> {
        if !self.format.is_valid() || self.frame_duration_us == 0 {
            tracing::debug!(
                "[TimedRenderer] Not allocating yet (format {}, frame {}us)",
                self.format,
                self.frame_duration_us
            );
            return Ok(());
        }
        if self.ring.is_some() {
            self.flush(true);
            self.ring = None;
        }
        self.frame_bytes = self.format.us_to_bytes(self.frame_duration_us);
        self.ring = Some(FrameRing::new(
            self.config.num_frames,
            self.format.channels(),
            self.frame_bytes,
        )?);
        tracing::info!(
            "[TimedRenderer] Hold ring of {} frames x {} bytes/ch",
            self.config.num_frames,
            self.frame_bytes
        );
        Ok(())
    }

    /// Drop everything held and forget the render time.
    pub fn reset(&mut self) {
        self.flush(true);
        self.clear_render_time();
        self.remaining_zeros_to_pad_us = 0;
        self.input_bytes_to_drop = 0;
    }

    // ========================================================================
    // Processing
    // ========================================================================

    pub fn process(
        &mut self,
        mut input: Option<&mut StreamSegment>,
        mut output: Option<&mut StreamSegment>,
    ) -> Result<RenderOutcome> {
        let in_len = input.as_deref().map_or(0, StreamSegment::len);
        let has_input = input
            .as_deref()
            .is_some_and(|i| !i.is_empty() || i.flags.marker_eos);
        let has_output = output.as_deref().is_some_and(|o| o.max_len() > 0);

        if !has_input && !has_output {
            self.fault(RendererFault::BadArgs);
            return Err(EngineError::BadParam {
                id: "process".into(),
                reason: "neither input nor output provided".into(),
            });
        }
        if self.ring.is_none() {
            self.fault(RendererFault::NoHeldBuffer);
            drop_input_metadata(input.as_deref_mut());
            return Err(EngineError::NotReady("hold ring not allocated".into()));
        }
        if let Some(out) = output.as_deref().filter(|_| has_output) {
            let (out_len, out_max) = (out.len(), out.max_len());
            if out_len != 0 {
                self.fault(RendererFault::OutputNotEmpty);
                drop_input_metadata(input.as_deref_mut());
                return Err(EngineError::BufferError(format!(
                    "output already holds {out_len} bytes/ch"
                )));
            }
            if out_max < self.frame_bytes {
                self.fault(RendererFault::NotEnoughOutput);
                drop_input_metadata(input.as_deref_mut());
                return Err(EngineError::BufferError(format!(
                    "output holds {out_max} of {} bytes/ch",
                    self.frame_bytes
                )));
            }
        }

        if let Some(inp) = input.as_deref_mut()
            && inp.flags.marker_eos
        {
            return Ok(self.forward_eos(inp, output.as_deref_mut(), in_len));
        }

        let timer_triggered = has_output;
        if timer_triggered {
            self.wall_clock_at_trigger_us = self.clock.now_us();
        }
        let resync = self.take_render_times(input.as_deref_mut());

        if !self.first_ttr_received {
            tracing::debug!("[TimedRenderer] No render time yet, dropping input");
            drop_input_metadata(input.as_deref_mut());
            let produced = self.underrun(output.as_deref_mut(), true);
            return Ok(RenderOutcome {
                decision: self.decision,
                consumed: in_len,
                produced,
            });
        }

        if (timer_triggered && !self.decision.is_render()) || resync {
            if !timer_triggered {
                // The next timer trigger is about one frame after the last one.
                self.wall_clock_at_trigger_us += self.frame_duration_us;
            }
            self.decision = self.decide(resync)?;
        }
        if self.decision.is_pending() {
            tracing::debug!("[TimedRenderer] No decision yet, holding");
            self.decision = RenderDecision::Hold;
        }

        let (consumed, mut produced) = match self.decision {
            RenderDecision::Hold => {
                let consumed = self.buffer_input(input.as_deref_mut())?;
                (consumed, self.underrun(output.as_deref_mut(), true))
            }
            RenderDecision::Render => {
                let consumed = self.buffer_input(input.as_deref_mut())?;
                (consumed, self.render(output.as_deref_mut())?)
            }
            RenderDecision::Drop => {
                drop_input_metadata(input.as_deref_mut());
                (in_len, self.underrun(output.as_deref_mut(), true))
            }
            RenderDecision::Pending => {
                self.fault(RendererFault::UnexpectedDecision);
                (0, 0)
            }
        };

        if has_output
            && let Some(out) = output.as_deref_mut()
            && out.is_empty()
        {
            self.fault(RendererFault::UnexpectedUnderrun);
            produced = self.underrun(Some(out), false);
        }

        Ok(RenderOutcome {
            decision: self.decision,
            consumed,
            produced,
        })
    }

    /// Flush held data and send end of stream out immediately on an empty frame.
    fn forward_eos(
        &mut self,
        input: &mut StreamSegment,
        output: Option<&mut StreamSegment>,
        in_len: usize,
    ) -> RenderOutcome {
        tracing::info!("[TimedRenderer] End of stream, dropping held data");
        let mut kept = self.flush(false);
        self.clear_render_time();

        let Some(output) = output else {
            // Keep it on the input until an output shows up.
            input.metadata.move_all(&mut kept);
            kept.move_all(&mut input.metadata);
            return RenderOutcome {
                decision: self.decision,
                consumed: 0,
                produced: 0,
            };
        };

        input.flags.marker_eos = false;
        input.metadata.move_all(&mut kept);
        let stale = kept.destroy_where(DropReason::Dropped, |n| is_render_time(&n.payload));
        if stale > 0 {
            tracing::debug!("[TimedRenderer] Dropped {} render time nodes with the stream", stale);
        }
        kept.set_offsets(0);
        output.buffers.clear();
        kept.move_all(&mut output.metadata);
        output.flags.marker_eos = output.metadata.has_eos();

        RenderOutcome {
            decision: self.decision,
            consumed: in_len,
            produced: 0,
        }
    }

    /// Pull render times off the input. Returns whether one asked for a resync.
    fn take_render_times(&mut self, input: Option<&mut StreamSegment>) -> bool {
        let Some(input) = input else {
            return false;
        };
        let times: Vec<(i64, bool, PacketToken)> = input
            .metadata
            .iter()
            .filter_map(|n| match n.payload {
                MetadataPayload::TargetRenderTime {
                    ttr_us,
                    resync,
                    packet_token,
                } => Some((ttr_us, resync, packet_token)),
                _ => None,
            })
            .collect();
        if times.is_empty() {
            return false;
        }
        input
            .metadata
            .destroy_where(DropReason::Dropped, |n| is_render_time(&n.payload));

        let mut resync = false;
        for (ttr_us, ttr_resync, token) in times {
            if ttr_resync {
                tracing::info!("[TimedRenderer] Render time resync in {}", self.decision);
                if !self.decision.is_render() {
                    self.flush(true);
                }
                self.clear_render_time();
                resync = true;
            }
            if self.first_ttr_received {
                tracing::debug!(
                    "[TimedRenderer] Ignoring render time {}us, holding {}us",
                    ttr_us,
                    self.curr_ttr_us
                );
            } else if token == PacketToken::P1 {
                // Only the cycle's first packet guarantees enough data until the next cycle.
                self.curr_ttr_us = ttr_us;
                self.first_ttr_received = true;
                self.decision = RenderDecision::Pending;
                tracing::debug!("[TimedRenderer] Render time {}us accepted", ttr_us);
            } else {
                tracing::debug!("[TimedRenderer] Render time with {:?} skipped, waiting for P1", token);
            }
        }
        resync
    }

    fn decide(&mut self, resync: bool) -> Result<RenderDecision> {
        let wall = self.wall_clock_at_trigger_us;
        let diff = self.curr_ttr_us - wall;
        tracing::debug!(
            "[TimedRenderer] Deciding at {}us for render time {}us",
            wall,
            self.curr_ttr_us
        );

        if diff < 0 && diff.abs() > self.config.jitter_tolerance_us {
            tracing::warn!(
                "[TimedRenderer] Render time {}us missed by {}us, dropping held data",
                self.curr_ttr_us,
                -diff
            );
            self.first_ttr_received = false;
            self.flush(true);
            return Ok(RenderDecision::Drop);
        }

        // Regular prebuffer plus one-time prebuffer, plus however early we are.
        let need_us = 2 * self.frame_duration_us + diff.max(0);
        let held = self.bytes_held();
        if held > 0 && resync {
            let need = self.format.us_to_bytes(need_us);
            if need > held {
                self.buffer_zeros(need - held)?;
            } else {
                // Trim from the new data, not from what is already playing.
                self.input_bytes_to_drop = held - need;
            }
            tracing::info!(
                "[TimedRenderer] Resync keeps rendering: need {} bytes/ch, held {}, dropping {} of the next input",
                need,
                held,
                self.input_bytes_to_drop
            );
            return Ok(RenderDecision::Render);
        }

        if diff.abs() <= self.frame_duration_us {
            self.remaining_zeros_to_pad_us = need_us;
            tracing::info!(
                "[TimedRenderer] Rendering with {}us of leading silence",
                need_us
            );
            return Ok(RenderDecision::Render);
        }
        Ok(RenderDecision::Hold)
    }

    // ========================================================================
    // Hold ring
    // ========================================================================

    fn flush(&mut self, force: bool) -> MetadataList {
        let mut kept = MetadataList::new();
        if let Some(ring) = self.ring.as_mut() {
            let discarded = ring.flush(force, &mut kept);
            self.stats.bytes_dropped += discarded as u64;
            if discarded > 0 {
                tracing::info!("[TimedRenderer] Flushed {} bytes/ch", discarded);
            }
        }
        kept
    }

    fn clear_render_time(&mut self) {
        tracing::debug!("[TimedRenderer] Clearing render time {}us", self.curr_ttr_us);
        self.decision = RenderDecision::Pending;
        self.curr_ttr_us = 0;
        self.first_ttr_received = false;
    }

    /// Append the input to the ring, spilling across frames. Returns bytes per channel consumed.
    fn buffer_input(&mut self, input: Option<&mut StreamSegment>) -> Result<usize> {
        let Some(input) = input else {
            return Ok(0);
        };
        let in_len = input.len();
        if in_len == 0 {
            drop_input_metadata(Some(input));
            return Ok(0);
        }
        if input.flags.erasure {
            tracing::debug!("[TimedRenderer] Input is erasure, dropping instead of holding");
            input.flags.erasure = false;
            input.metadata.destroy_all(DropReason::Dropped);
            return Ok(in_len);
        }

        let frame_bytes = self.frame_bytes;
        // Upstream drift correction can add or remove a sample, so anything
        // short of two frames is taken whole.
        let len = if in_len >= 2 * frame_bytes {
            frame_bytes
        } else {
            in_len
        };

        let mut read = 0;
        if self.input_bytes_to_drop > 0 {
            drop_input_metadata(Some(&mut *input));
            if len <= self.input_bytes_to_drop {
                self.input_bytes_to_drop -= len;
                tracing::warn!("[TimedRenderer] Dropping a whole input of {} bytes/ch", len);
                return Ok(len);
            }
            read = self.input_bytes_to_drop;
            self.input_bytes_to_drop = 0;
            tracing::warn!("[TimedRenderer] Dropping {} bytes/ch from the input", read);
        }

        let fmt = self.format;
        let Some(ring) = self.ring.as_mut() else {
            return Ok(0);
        };
        let mut written = 0u64;
        while read < len {
            if ring.is_full() {
                tracing::error!(
                    "[TimedRenderer] Hold ring overflow (read {}, write {})",
                    ring.read_idx(),
                    ring.write_idx()
                );
                let frames = ring.num_frames();
                drop_input_metadata(Some(input));
                self.stats.bytes_written += written;
                return Err(EngineError::Overflow { frames });
            }

            let frame = ring.write_frame_mut();
            let unread_before = frame.unread();
            if frame.data.is_empty() {
                frame.flags.clear();
                frame.timestamp = 0;
                if let Some(ts) = input.timestamp() {
                    frame.timestamp = ts + fmt.bytes_to_us(read);
                    frame.flags.timestamp_valid = true;
                }
            }
            let copied = frame.data.append_from(&input.buffers, read, len - read)?;
            let span = PropagationSpan::passthrough(
                fmt.bytes_to_samples(copied),
                fmt.bytes_to_samples(unread_before),
            );
            propagate(
                Some(&mut *input as &mut dyn MetadataCarrier),
                &mut *frame,
                None,
                0,
                span,
            );

            read += copied;
            written += copied as u64;
            if frame.is_full() {
                ring.advance_write();
            } else if copied == 0 {
                break;
            }
        }
        self.stats.bytes_written += written;
        Ok(len)
    }

    fn buffer_zeros(&mut self, bytes: usize) -> Result<()> {
        let Some(ring) = self.ring.as_mut() else {
            return Ok(());
        };
        let mut remaining = bytes;
        while remaining > 0 {
            if ring.is_full() {
                tracing::error!("[TimedRenderer] Hold ring overflow while padding {} bytes/ch", remaining);
                return Err(EngineError::Overflow {
                    frames: ring.num_frames(),
                });
            }
            let frame = ring.write_frame_mut();
            if frame.data.is_empty() {
                frame.flags.clear();
            }
            let padded = frame.data.append_zeros(remaining);
            remaining -= padded;
            self.stats.bytes_written += padded as u64;
            if frame.is_full() {
                ring.advance_write();
            } else if padded == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Put owed silence at the front of an empty output.
    fn prefill_zeros(&mut self, output: &mut StreamSegment) -> Result<()> {
        let pad_us = self.frame_duration_us.min(self.remaining_zeros_to_pad_us);
        if pad_us <= 0 {
            return Ok(());
        }
        let bytes = self.format.us_to_bytes(pad_us);
        if bytes > output.max_len() {
            tracing::error!(
                "[TimedRenderer] Prefill of {} bytes/ch exceeds output of {}",
                bytes,
                output.max_len()
            );
            return Err(EngineError::BufferError(format!(
                "prefill of {bytes} bytes/ch does not fit"
            )));
        }
        output.buffers.append_zeros(bytes);

        // Extrapolate back from the first held data.
        let first_ts = self
            .ring
            .as_ref()
            .map(FrameRing::read_frame)
            .filter(|f| f.flags.timestamp_valid)
            .map(|f| f.timestamp);
        output.set_timestamp(first_ts.map(|ts| ts - self.remaining_zeros_to_pad_us));

        self.remaining_zeros_to_pad_us -= pad_us;
        tracing::debug!(
            "[TimedRenderer] Padded {}us of silence, {}us remaining",
            pad_us,
            self.remaining_zeros_to_pad_us
        );
        Ok(())
    }

    /// Fill one output frame from the oldest held data forward.
    fn render(&mut self, output: Option<&mut StreamSegment>) -> Result<usize> {
        let Some(output) = output else {
            return Ok(0);
        };
        if self.bytes_held() == 0 {
            tracing::warn!("[TimedRenderer] Nothing held to render");
            return Ok(0);
        }
        self.prefill_zeros(output)?;
        if output.len() >= self.frame_bytes {
            return Ok(output.len());
        }

        let fmt = self.format;
        let mut to_copy = self.frame_bytes - output.len();
        let mut stamp_output = output.is_empty();
        let Some(ring) = self.ring.as_mut() else {
            return Ok(output.len());
        };

        while to_copy > 0 {
            if output.flags.end_of_frame {
                break;
            }
            let held = ring.held_bytes();
            if to_copy > held {
                tracing::warn!(
                    "[TimedRenderer] Only {} of {} bytes/ch held, rendering short",
                    held,
                    to_copy
                );
                to_copy = held;
            }

            let frame = ring.read_frame_mut();
            let out_before = output.len();
            let read_offset = frame.read_offset;
            let copied = output.buffers.append_from(&frame.data, read_offset, to_copy)?;
            if stamp_output && copied > 0 {
                if frame.flags.timestamp_valid {
                    output.set_timestamp(Some(frame.timestamp + fmt.bytes_to_us(read_offset)));
                }
                stamp_output = false;
            }
            frame.read_offset += copied;
            to_copy -= copied;

            let span = PropagationSpan::passthrough(
                fmt.bytes_to_samples(copied),
                fmt.bytes_to_samples(out_before),
            );
            propagate(
                Some(&mut *frame as &mut dyn MetadataCarrier),
                &mut *output,
                None,
                0,
                span,
            );
            self.stats.bytes_rendered += copied as u64;

            if frame.unread() == 0 {
                ring.advance_read();
            }
            if copied == 0 {
                break;
            }
        }

        // The ring ran dry mid-frame. New data needs the same pre-roll again.
        if ring.held_bytes() == 0 && ring.read_idx() != ring.write_idx() {
            self.remaining_zeros_to_pad_us = 2 * self.frame_duration_us;
            tracing::debug!(
                "[TimedRenderer] Ring drained, write {} -> {}, prebuffer {}us",
                ring.write_idx(),
                ring.read_idx(),
                self.remaining_zeros_to_pad_us
            );
            ring.snap_write_to_read();
        }
        Ok(output.len())
    }

    /// Replace the output with one frame of silence flagged as erasure.
    fn underrun(&self, output: Option<&mut StreamSegment>, clear_timestamp: bool) -> usize {
        let Some(output) = output else {
            return 0;
        };
        output.buffers.clear();
        let written = output.buffers.append_zeros(self.frame_bytes);
        output.flags.erasure = true;
        if clear_timestamp {
            output.set_timestamp(None);
        }
        written
    }

    fn fault(&mut self, fault: RendererFault) {
        let now = self.clock.now_us();
        self.counters.record(fault, now);
    }
}
