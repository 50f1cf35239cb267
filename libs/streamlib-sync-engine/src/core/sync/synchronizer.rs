// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::path::PathState;
use super::state::{PortDirection, SyncPath, SyncState};
use crate::core::clocks::Clock;
use crate::core::config::SyncConfig;
use crate::core::error::{EngineError, Result};
use crate::core::events::{self, EngineEvent, EventSink};
use crate::core::media_format::MediaFormat;
use crate::core::metadata::{DropReason, MetadataNode, PacketToken};
use crate::core::params::{Param, ParamId, VoiceProcInfo};
use crate::core::ports::PortLifecycle;
use crate::core::scheduling::TriggerPolicy;
use crate::core::stream::StreamSegment;

const PRIMARY: usize = 0;
const SECONDARY: usize = 1;

/// Frame sizes with special target-render-time cadence.
const TEN_MS_FRAME_US: i64 = 10_000;
const TWENTY_MS_FRAME_US: i64 = 20_000;
const FORTY_MS_CYCLE: u32 = 40;

/// What one `process()` call did.
///
/// The host drops `consumed` bytes from the front of each input before the
/// next call. Any metadata still on an input was already rebased to match.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub consumed: [usize; 2],
    pub produced: [usize; 2],
    pub trigger_policy: TriggerPolicy,
    pub state: SyncState,
    /// Per-path failures. The rest of the call still ran.
    pub errors: Vec<EngineError>,
}

/// Aligns a primary and a secondary path to the periodic tick.
///
/// Before the first tick both paths buffer into fixed rings. The tick
/// releases one frame per path with leading zeros so the paths line up,
/// after which frames are released per tick until a whole cycle has been
/// produced and the paths pass straight through.
pub struct Synchronizer {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    events: Box<dyn EventSink>,
    paths: [PathState; 2],
    state: SyncState,

    voice_proc_info: VoiceProcInfo,
    vfr_timestamp_us: Option<i64>,
    vfr_ts_at_tick: i64,

    threshold_us: i64,
    threshold_bytes: usize,
    out_required_per_cycle: usize,
    out_generated_this_cycle: usize,
    out_to_drop: usize,

    bytes_since_token: usize,
    packet_token: PacketToken,
    skip_next_ttr: bool,
    ttr_resync_pending: bool,

    can_process: bool,
    tick_received: bool,
    received_eof: bool,
    discontinuity_handling: bool,
    threshold_enabled: bool,
    trigger_policy: TriggerPolicy,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state)
            .field("clock", &self.clock.description())
            .field("threshold_bytes", &self.threshold_bytes)
            .field("out_generated_this_cycle", &self.out_generated_this_cycle)
            .field("out_required_per_cycle", &self.out_required_per_cycle)
            .field("trigger_policy", &self.trigger_policy)
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    pub fn new(config: SyncConfig, clock: Arc<dyn Clock>, events: Box<dyn EventSink>) -> Self {
        Self {
            config,
            clock,
            events,
            paths: [
                PathState::new(SyncPath::Primary),
                PathState::new(SyncPath::Secondary),
            ],
            state: SyncState::BeforeFirstTick,
            voice_proc_info: VoiceProcInfo::default(),
            vfr_timestamp_us: None,
            vfr_ts_at_tick: 0,
            threshold_us: 0,
            threshold_bytes: 0,
            out_required_per_cycle: 0,
            out_generated_this_cycle: 0,
            out_to_drop: 0,
            bytes_since_token: 0,
            packet_token: PacketToken::P1,
            skip_next_ttr: false,
            ttr_resync_pending: false,
            can_process: true,
            tick_received: false,
            received_eof: false,
            discontinuity_handling: true,
            threshold_enabled: false,
            trigger_policy: TriggerPolicy::DataTriggered,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        self.trigger_policy
    }

    /// Whether the host should enforce its own threshold buffering.
    pub fn is_threshold_enabled(&self) -> bool {
        self.threshold_enabled
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    pub fn buffered(&self, path: SyncPath) -> usize {
        self.paths[path.index()].buffered()
    }

    pub fn ring_capacity(&self, path: SyncPath) -> usize {
        self.paths[path.index()].capacity()
    }

    pub fn zeros_were_padded(&self, path: SyncPath) -> bool {
        self.paths[path.index()].zeros_were_padded
    }

    pub fn next_expected_timestamp(&self, path: SyncPath) -> Option<i64> {
        self.paths[path.index()].next_expected_ts
    }

    pub fn out_generated_this_cycle(&self) -> usize {
        self.out_generated_this_cycle
    }

    pub fn out_to_drop(&self) -> usize {
        self.out_to_drop
    }

    pub fn voice_proc_info(&self) -> &VoiceProcInfo {
        &self.voice_proc_info
    }

    /// Turn end-of-frame gap repair on or off. On by default.
    pub fn set_discontinuity_handling(&mut self, enabled: bool) {
        self.discontinuity_handling = enabled;
    }

    /// Latest periodic tick timestamp published by the timer, if subscribed.
    pub fn set_vfr_timestamp(&mut self, timestamp_us: Option<i64>) {
        self.vfr_timestamp_us = timestamp_us;
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_media_format(&mut self, path: SyncPath, format: MediaFormat) -> Result<()> {
        if !format.is_valid() {
            return Err(EngineError::BadParam {
                id: format!("{path} media format"),
                reason: format!("unsupported format {format}"),
            });
        }
        let state = &mut self.paths[path.index()];
        if state.media_format == format {
            return Ok(());
        }
        state.media_format = format;
        tracing::info!("[Synchronizer] {} media format {}", path, format);

        if self.voice_proc_info.start_samples_us != 0 {
            self.paths[path.index()]
                .allocate_ring(i64::from(self.voice_proc_info.start_samples_us))?;
            self.out_required_per_cycle = self.primary_format().us_to_bytes(self.voice_proc_info.cycle_duration_us());
        }
        if self.threshold_us != 0 {
            self.threshold_bytes = self.primary_format().us_to_bytes(self.threshold_us);
        }
        Ok(())
    }

    pub fn set_param_raw(&mut self, id: ParamId, payload: &[u8]) -> Result<()> {
        let param = Param::decode(id, payload)?;
        self.set_param(param)
    }

    pub fn set_param(&mut self, param: Param) -> Result<()> {
        match param {
            Param::VoiceProcInfo(info) => self.set_voice_proc_info(info),
            Param::ContainerFrameDuration { duration_us } => {
                let duration_us = i64::from(duration_us);
                if duration_us != self.threshold_us {
                    self.threshold_us = duration_us;
                    if self.primary_format().is_valid() {
                        self.threshold_bytes = self.primary_format().us_to_bytes(duration_us);
                    }
                    tracing::info!(
                        "[Synchronizer] Frame duration {}us ({} bytes/ch)",
                        duration_us,
                        self.threshold_bytes
                    );
                    for port in self.paths.iter().filter_map(|p| p.input.index()) {
                        events::raise(
                            self.events.as_mut(),
                            EngineEvent::ThresholdChanged {
                                port,
                                bytes_per_channel: self.threshold_bytes,
                            },
                        );
                    }
                }
                Ok(())
            }
            Param::FirstProcTick => {
                tracing::debug!("[Synchronizer] Tick received in {}", self.state);
                self.tick_received = true;
                Ok(())
            }
            Param::ProcessNotification => {
                self.can_process = true;
                self.check_first_tick_jitter();
                Ok(())
            }
            Param::PortWillStart => {
                let both_started = self.paths.iter().all(|p| p.input.is_started());
                if !both_started {
                    // Anything the secondary held belongs to the previous run.
                    let secondary = &mut self.paths[SECONDARY];
                    secondary.reset_ring();
                    secondary.zeros_were_padded = false;
                    self.toggle_threshold(false);
                }
                Ok(())
            }
            Param::Resync => {
                self.resync("host request");
                Ok(())
            }
            Param::DataDropDuringSync => {
                if self.state.is_before_first_tick() {
                    tracing::debug!("[Synchronizer] Data drop before first tick ignored");
                } else {
                    self.resync("data dropped upstream");
                }
                Ok(())
            }
        }
    }

    fn set_voice_proc_info(&mut self, info: VoiceProcInfo) -> Result<()> {
        tracing::info!(
            "[Synchronizer] Voice proc info: offset {}us, start samples {}us, cycle {}ms, path delay {}us, subscribe {}",
            info.start_offset_us,
            info.start_samples_us,
            info.cycle_duration_ms,
            info.path_delay_us,
            info.is_subscribe
        );
        self.voice_proc_info = info;
        if !info.is_subscribe {
            self.vfr_timestamp_us = None;
            return Ok(());
        }

        let start_samples_us = i64::from(info.start_samples_us);
        if self.primary_format().is_valid() {
            self.paths[PRIMARY].allocate_ring(start_samples_us)?;
            self.out_required_per_cycle = self.primary_format().us_to_bytes(info.cycle_duration_us());
        }
        if self.paths[SECONDARY].media_format.is_valid() {
            self.paths[SECONDARY].allocate_ring(start_samples_us)?;
        }

        // A partial cycle was already sent, so drop forward instead of resetting.
        if !self.state.is_before_first_tick() {
            self.resync("voice proc info changed mid-stream");
        }
        Ok(())
    }

    fn check_first_tick_jitter(&mut self) {
        if !self.tick_received || !self.is_first_frame_of_cycle() {
            return;
        }
        let Some(vfr_ts) = self.vfr_timestamp_us else {
            return;
        };
        let expected = vfr_ts + i64::from(self.voice_proc_info.start_offset_us);
        let jitter = self.clock.now_us() - expected;
        if jitter >= self.config.first_tick_jitter_threshold_us {
            tracing::warn!(
                "[Synchronizer] First frame scheduled {}us after the tick (limit {}us)",
                jitter,
                self.config.first_tick_jitter_threshold_us
            );
            self.resync("late first frame");
        }
    }

    fn primary_format(&self) -> MediaFormat {
        self.paths[PRIMARY].media_format
    }

    // ========================================================================
    // Port lifecycle
    // ========================================================================

    fn lifecycle_mut(&mut self, path: SyncPath, direction: PortDirection) -> &mut PortLifecycle {
        let state = &mut self.paths[path.index()];
        match direction {
            PortDirection::Input => &mut state.input,
            PortDirection::Output => &mut state.output,
        }
    }

    pub fn open(&mut self, path: SyncPath, direction: PortDirection, index: usize) -> Result<()> {
        self.lifecycle_mut(path, direction).open(index)?;
        tracing::info!("[Synchronizer] {} {} port opened at {}", path, direction, index);
        Ok(())
    }

    pub fn start(&mut self, path: SyncPath, direction: PortDirection) -> Result<()> {
        if self.lifecycle_mut(path, direction).start()? {
            // The first packets after a start carry no render time.
            self.skip_next_ttr = true;
            tracing::info!("[Synchronizer] {} {} port started", path, direction);
        }
        Ok(())
    }

    pub fn stop(&mut self, path: SyncPath, direction: PortDirection) {
        if !self.lifecycle_mut(path, direction).stop() {
            return;
        }
        tracing::info!("[Synchronizer] {} {} port stopped", path, direction);
        if path.is_primary() {
            self.reset_session(true);
        }
    }

    pub fn close(&mut self, path: SyncPath, direction: PortDirection) {
        if !self.lifecycle_mut(path, direction).close() {
            return;
        }
        if direction == PortDirection::Input {
            self.paths[path.index()].ring = None;
        }
        tracing::info!("[Synchronizer] {} {} port closed", path, direction);
    }

    // ========================================================================
    // Session state
    // ========================================================================

    fn transition(&mut self, to: SyncState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        tracing::info!("[Synchronizer] {} -> {}", from, to);
        events::raise(self.events.as_mut(), EngineEvent::SyncStateChanged { from, to });
    }

    fn toggle_threshold(&mut self, enabled: bool) {
        self.threshold_enabled = enabled;
        events::raise(
            self.events.as_mut(),
            EngineEvent::ThresholdBufferingToggled { enabled },
        );
    }

    fn set_trigger_policy(&mut self, policy: TriggerPolicy) {
        if self.trigger_policy == policy {
            return;
        }
        self.trigger_policy = policy;
        tracing::debug!("[Synchronizer] Trigger policy {}", policy);
        events::raise(
            self.events.as_mut(),
            EngineEvent::TriggerPolicyChanged { policy },
        );
    }

    fn is_first_frame_of_cycle(&self) -> bool {
        self.out_generated_this_cycle == 0
    }

    fn is_cycle_complete(&self) -> bool {
        self.out_generated_this_cycle >= self.out_required_per_cycle
    }

    fn should_move_to_steady_state(&self) -> bool {
        self.paths[SECONDARY].zeros_were_padded && self.is_cycle_complete()
    }

    /// Drop both rings and realign at the next tick.
    ///
    /// Output already produced this cycle is subtracted from the next
    /// outputs so the cycle still totals the required amount.
    fn resync(&mut self, reason: &str) {
        tracing::warn!(
            "[Synchronizer] Resync in {} ({}), dropping {} bytes/ch of upcoming output",
            self.state,
            reason,
            self.out_generated_this_cycle
        );
        self.transition(SyncState::Syncing);
        self.tick_received = false;
        self.out_to_drop = self.out_generated_this_cycle;
        self.received_eof = false;
        self.ttr_resync_pending = true;
        for path in &mut self.paths {
            path.zeros_were_padded = false;
            path.reset_ring();
        }
        self.set_trigger_policy(TriggerPolicy::DataTriggered);
        self.toggle_threshold(false);
    }

    fn reset_session(&mut self, reset_rings: bool) {
        tracing::info!("[Synchronizer] Session reset");
        self.transition(SyncState::BeforeFirstTick);
        self.bytes_since_token = 0;
        self.tick_received = false;
        if reset_rings {
            for path in &mut self.paths {
                path.reset_ring();
            }
        }
        self.packet_token = PacketToken::P1;
        for path in &mut self.paths {
            path.zeros_were_padded = false;
        }
        self.out_generated_this_cycle = 0;
        self.out_to_drop = 0;
        self.vfr_ts_at_tick = 0;
        self.received_eof = false;
        self.ttr_resync_pending = false;
        self.set_trigger_policy(TriggerPolicy::DataTriggered);
        self.toggle_threshold(false);
    }

    // ========================================================================
    // Timestamp discontinuities
    // ========================================================================

    /// Handle an end of frame that arrived without an end of stream.
    ///
    /// Returns whether one was found. The next expected timestamp of each
    /// started path is cached so the following call can repair the gap.
    fn handle_timestamp_discontinuity(&mut self, inputs: &mut [Option<&mut StreamSegment>; 2]) -> bool {
        if !self.discontinuity_handling {
            return false;
        }

        let mut eof_found = false;
        for path in SyncPath::ALL {
            let i = path.index();
            if !self.paths[i].input.is_open() {
                continue;
            }
            if let Some(input) = inputs[i].as_deref_mut()
                && input.flags.is_discontinuity()
            {
                tracing::warn!("[Synchronizer] {} end of frame without end of stream", path);
                input.flags.end_of_frame = false;
                eof_found = true;
            }
        }
        if !eof_found {
            return false;
        }

        if self.state.is_before_first_tick() {
            return true;
        }
        if self.received_eof {
            self.resync("second discontinuity before repair");
            return true;
        }

        for path in SyncPath::ALL {
            let i = path.index();
            let state = &mut self.paths[i];
            if !state.input.is_started() || !state.ts_valid {
                continue;
            }
            let input = inputs[i].as_deref();
            let base = input
                .and_then(StreamSegment::timestamp)
                .unwrap_or(state.cur_out_ts);
            let len = input.map_or(0, StreamSegment::len);
            let expected = base + state.media_format.bytes_to_us(len);
            state.next_expected_ts = Some(expected);
            tracing::debug!("[Synchronizer] {} next expected timestamp {}us", path, expected);
        }

        self.transition(SyncState::Syncing);
        self.received_eof = true;
        // Without this the host would deliver a full threshold on top of the partial frame.
        self.toggle_threshold(false);
        true
    }

    /// Compare arrivals against the cached expectation and fill small gaps with zeros.
    fn repair_timestamp_gap(&mut self, inputs: &[Option<&mut StreamSegment>; 2], errors: &mut Vec<EngineError>) {
        if !self.received_eof {
            return;
        }
        self.received_eof = false;
        if self.paths.iter().all(|p| p.next_expected_ts.is_none()) {
            return;
        }

        let mut deltas = [0i64; 2];
        for path in SyncPath::ALL {
            let i = path.index();
            let state = &self.paths[i];
            if !state.input.is_started() {
                continue;
            }
            if let (Some(actual), Some(expected)) = (
                inputs[i].as_deref().and_then(StreamSegment::timestamp),
                state.next_expected_ts,
            ) {
                deltas[i] = actual - expected;
            }
        }

        let tolerance = self.config.ts_repair_tolerance_us;
        if deltas.iter().all(|d| (0..=tolerance).contains(d)) {
            for path in SyncPath::ALL {
                let state = &mut self.paths[path.index()];
                let bytes = state.media_format.us_to_bytes(deltas[path.index()]);
                tracing::info!(
                    "[Synchronizer] {} repairing {}us gap with {} bytes/ch of zeros",
                    path,
                    deltas[path.index()],
                    bytes
                );
                if let Err(e) = state.buffer_zeros(bytes) {
                    errors.push(e);
                }
            }
        } else {
            tracing::warn!(
                "[Synchronizer] Gap of {}us / {}us outside 0..={}us",
                deltas[PRIMARY],
                deltas[SECONDARY],
                tolerance
            );
            self.resync("timestamp gap out of tolerance");
        }

        for path in &mut self.paths {
            path.next_expected_ts = None;
        }
    }

    // ========================================================================
    // Target render time
    // ========================================================================

    /// Count primary output and stamp a render time once a threshold has been produced.
    fn account_primary_output(&mut self, bytes: usize, output: Option<&mut StreamSegment>) {
        self.bytes_since_token += bytes;
        self.out_generated_this_cycle += bytes;

        if self.threshold_us == TWENTY_MS_FRAME_US {
            self.skip_next_ttr = false;
        }
        if self.bytes_since_token != self.threshold_bytes {
            return;
        }
        // A full frame went out this tick. Wait for the next notification.
        self.can_process = false;
        self.bytes_since_token = 0;

        if self.skip_next_ttr {
            self.skip_next_ttr = false;
            return;
        }
        if self.threshold_us == TEN_MS_FRAME_US {
            self.skip_next_ttr = true;
        }

        let ttr = self.vfr_ts_at_tick
            + i64::from(self.voice_proc_info.path_delay_us)
            + i64::from(self.voice_proc_info.start_offset_us);
        if let Some(output) = output {
            output.metadata.create(MetadataNode::target_render_time(
                ttr,
                self.ttr_resync_pending,
                self.packet_token,
            ));
            tracing::debug!(
                "[Synchronizer] Render time {}us, token {:?}, resync {}",
                ttr,
                self.packet_token,
                self.ttr_resync_pending
            );
            self.ttr_resync_pending = false;
        }
        if self.voice_proc_info.cycle_duration_ms == FORTY_MS_CYCLE {
            self.packet_token = self.packet_token.next();
        }
    }

    // ========================================================================
    // Processing
    // ========================================================================

    fn ensure_configured(&self) -> Result<()> {
        let primary = &self.paths[PRIMARY];
        if !primary.input.is_started() {
            return Ok(());
        }
        if primary.ring.is_none() || self.threshold_bytes == 0 {
            return Err(EngineError::NotReady(format!(
                "synchronizer not configured (ring {} bytes/ch, threshold {} bytes/ch)",
                primary.capacity(),
                self.threshold_bytes
            )));
        }
        Ok(())
    }

    /// Run one invocation over both paths. Slot 0 is the primary path.
    pub fn process(
        &mut self,
        mut inputs: [Option<&mut StreamSegment>; 2],
        mut outputs: [Option<&mut StreamSegment>; 2],
    ) -> Result<ProcessOutcome> {
        self.ensure_configured()?;

        if let Some(vfr_ts) = self.vfr_timestamp_us
            && self.is_first_frame_of_cycle()
        {
            self.vfr_ts_at_tick = vfr_ts;
        }

        let mut errors = Vec::new();
        let mut in_len = [0usize; 2];
        for path in SyncPath::ALL {
            let i = path.index();
            self.paths[i].input_unconsumed = false;
            in_len[i] = inputs[i].as_deref().map_or(0, StreamSegment::len);
            if self.paths[i].input.is_open() {
                self.paths[i].set_first_out_timestamp(inputs[i].as_deref());
            }
        }

        let eof_found = self.handle_timestamp_discontinuity(&mut inputs);
        // Never pad in the same call that reported the gap.
        if !eof_found {
            self.repair_timestamp_gap(&inputs, &mut errors);
            // A resync during repair dropped the timeline.
            for path in SyncPath::ALL {
                let i = path.index();
                if self.paths[i].input.is_open() {
                    self.paths[i].set_first_out_timestamp(inputs[i].as_deref());
                }
            }
        }

        let eof_propagated = match self.state {
            SyncState::BeforeFirstTick => {
                self.process_before_first_tick(&mut inputs, &mut outputs, &in_len, &mut errors)
            }
            SyncState::Syncing => {
                self.process_syncing(&mut inputs, &mut outputs, &mut in_len, &mut errors)
            }
            SyncState::SteadyState => {
                self.process_steady(&mut inputs, &mut outputs, &mut in_len, &mut errors)
            }
        };

        let mut consumed = [0usize; 2];
        for path in SyncPath::ALL {
            let i = path.index();
            if let Some(input) = inputs[i].as_deref_mut() {
                input.flags.end_of_frame = false;
                consumed[i] = if self.paths[i].input_unconsumed { 0 } else { in_len[i] };
            }
        }

        if self.out_to_drop > 0 {
            self.drop_resynced_output(&mut outputs);
        }

        let policy = if self.is_cycle_complete() && self.paths[SECONDARY].zeros_were_padded {
            TriggerPolicy::TimerTriggered
        } else {
            // Stay responsive to arriving data until the secondary is aligned.
            TriggerPolicy::DataTriggered
        };
        self.set_trigger_policy(policy);

        if self.is_cycle_complete() {
            self.out_generated_this_cycle = 0;
            // While syncing, every cycle waits for its own tick.
            if !self.state.is_steady() {
                self.tick_received = false;
            }
        }

        if eof_propagated {
            self.resync("end of frame reached the pipeline");
        }

        let produced = [
            outputs[PRIMARY].as_deref().map_or(0, StreamSegment::len),
            outputs[SECONDARY].as_deref().map_or(0, StreamSegment::len),
        ];
        Ok(ProcessOutcome {
            consumed,
            produced,
            trigger_policy: self.trigger_policy,
            state: self.state,
            errors,
        })
    }

    fn drop_resynced_output(&mut self, outputs: &mut [Option<&mut StreamSegment>; 2]) {
        let primary_len = outputs[PRIMARY].as_deref().map_or(0, StreamSegment::len);
        self.out_to_drop -= self.out_to_drop.min(primary_len);
        for output in outputs.iter_mut().flatten() {
            if output.is_empty() {
                continue;
            }
            tracing::debug!(
                "[Synchronizer] Dropping {} bytes/ch after resync, {} left to drop",
                output.len(),
                self.out_to_drop
            );
            output.buffers.clear();
            output.metadata.retain_stream_eos(DropReason::Dropped);
        }
    }

    fn process_before_first_tick(
        &mut self,
        inputs: &mut [Option<&mut StreamSegment>; 2],
        outputs: &mut [Option<&mut StreamSegment>; 2],
        in_len: &[usize; 2],
        errors: &mut Vec<EngineError>,
    ) -> bool {
        let mut eof_dropped = false;

        // Data flow began after the tick, so this tick cannot align anything.
        if self.tick_received && self.paths[PRIMARY].is_ring_empty() {
            self.tick_received = false;
        }

        for path in SyncPath::ALL {
            let i = path.index();
            if !self.paths[i].input.is_started() {
                continue;
            }
            match self.paths[i].buffer_input(inputs[i].as_deref_mut(), in_len[i]) {
                Ok(dropped) => eof_dropped |= dropped,
                Err(e) => errors.push(e),
            }
        }

        if !self.tick_received {
            return eof_dropped;
        }

        let primary_capacity = self.paths[PRIMARY].capacity();
        if let Err(e) = self.paths[PRIMARY].pad_initial_zeros(primary_capacity) {
            errors.push(e);
        }
        self.release_frame(SyncPath::Primary, outputs, errors);

        let secondary = &mut self.paths[SECONDARY];
        if secondary.input.is_started() {
            if secondary.is_ring_empty() {
                tracing::debug!("[Synchronizer] secondary had no data before the tick");
            } else {
                let capacity = secondary.capacity();
                if let Err(e) = secondary.pad_initial_zeros(capacity) {
                    errors.push(e);
                }
                self.release_frame(SyncPath::Secondary, outputs, errors);
            }
        }
        if !self.paths[SECONDARY].zeros_were_padded {
            self.underrun_secondary(outputs, errors);
        }

        if self.should_move_to_steady_state() {
            self.transition(SyncState::SteadyState);
            self.toggle_threshold(true);
        } else {
            self.transition(SyncState::Syncing);
            self.toggle_threshold(false);
        }
        eof_dropped
    }

    fn process_syncing(
        &mut self,
        inputs: &mut [Option<&mut StreamSegment>; 2],
        outputs: &mut [Option<&mut StreamSegment>; 2],
        in_len: &mut [usize; 2],
        errors: &mut Vec<EngineError>,
    ) -> bool {
        let mut eof_dropped = false;
        let first_frame = self.is_first_frame_of_cycle();
        // The first frame of a cycle needs the whole ring, later ones one frame.
        let threshold = if first_frame {
            self.paths[PRIMARY].capacity()
        } else {
            self.threshold_bytes
        };

        let primary = &mut self.paths[PRIMARY];
        if primary.buffered() >= threshold {
            primary.input_unconsumed = true;
        } else {
            // Alignment happened on the first frame, overflowing now would break it.
            if !first_frame {
                in_len[PRIMARY] = in_len[PRIMARY].min(threshold - primary.buffered());
            }
            match primary.buffer_input(inputs[PRIMARY].as_deref_mut(), in_len[PRIMARY]) {
                Ok(dropped) => eof_dropped |= dropped,
                Err(e) => errors.push(e),
            }
        }

        let primary_buffered = self.paths[PRIMARY].buffered();
        let secondary = &mut self.paths[SECONDARY];
        if secondary.input.is_started() {
            if secondary.buffered() >= threshold {
                secondary.input_unconsumed = true;
            } else {
                let mut secondary_first = first_frame;
                if in_len[SECONDARY] != 0 && secondary.is_ring_empty() {
                    // Line the late secondary up with what the primary holds.
                    secondary_first = true;
                    let zeros = primary_buffered.saturating_sub(in_len[SECONDARY]);
                    if let Err(e) = secondary.pad_initial_zeros(zeros) {
                        errors.push(e);
                    }
                }
                if !secondary_first {
                    in_len[SECONDARY] =
                        in_len[SECONDARY].min(threshold.saturating_sub(secondary.buffered()));
                }
                match secondary.buffer_input(inputs[SECONDARY].as_deref_mut(), in_len[SECONDARY]) {
                    Ok(dropped) => eof_dropped |= dropped,
                    Err(e) => errors.push(e),
                }
            }
        }

        if !self.can_process {
            return eof_dropped;
        }

        let primary_ready = self.paths[PRIMARY].buffered() >= threshold;
        let secondary_ready = self.paths[SECONDARY].buffered() >= threshold;
        let secondary_padded = self.paths[SECONDARY].zeros_were_padded;
        // A secondary aligned at the tick must catch up before anything is released.
        if self.tick_received && primary_ready && (!secondary_padded || secondary_ready) {
            self.release_frame(SyncPath::Primary, outputs, errors);
            if secondary_ready {
                self.release_frame(SyncPath::Secondary, outputs, errors);
            } else {
                self.underrun_secondary(outputs, errors);
            }
        }

        if self.should_move_to_steady_state() {
            self.transition(SyncState::SteadyState);
            self.toggle_threshold(true);
        }
        eof_dropped
    }

    fn process_steady(
        &mut self,
        inputs: &mut [Option<&mut StreamSegment>; 2],
        outputs: &mut [Option<&mut StreamSegment>; 2],
        in_len: &mut [usize; 2],
        errors: &mut Vec<EngineError>,
    ) -> bool {
        let mut eof_propagated = false;
        for path in SyncPath::ALL {
            let i = path.index();
            let (Some(input), Some(output)) = (inputs[i].as_deref_mut(), outputs[i].as_deref_mut())
            else {
                in_len[i] = 0;
                continue;
            };
            let (threshold_bytes, threshold_us) = (self.threshold_bytes, self.threshold_us);
            let result = match self.paths[i].pass_through(input, output, threshold_bytes, threshold_us) {
                Ok(result) => result,
                Err(e) => {
                    in_len[i] = 0;
                    errors.push(e);
                    continue;
                }
            };
            in_len[i] = result.consumed;
            eof_propagated |= result.end_of_frame;
            if path.is_primary() {
                self.account_primary_output(result.produced, Some(output));
            }
        }
        eof_propagated
    }

    fn release_frame(
        &mut self,
        path: SyncPath,
        outputs: &mut [Option<&mut StreamSegment>; 2],
        errors: &mut Vec<EngineError>,
    ) {
        let i = path.index();
        let (threshold_bytes, threshold_us) = (self.threshold_bytes, self.threshold_us);
        let released = self.paths[i].output_buffered(outputs[i].as_deref_mut(), threshold_bytes, threshold_us);
        match released {
            Ok(bytes) => {
                // Output that will be dropped does not count toward the cycle.
                if path.is_primary() && self.out_to_drop == 0 {
                    self.account_primary_output(bytes, outputs[i].as_deref_mut());
                }
            }
            Err(e) => errors.push(e),
        }
    }

    fn underrun_secondary(
        &mut self,
        outputs: &mut [Option<&mut StreamSegment>; 2],
        errors: &mut Vec<EngineError>,
    ) {
        let threshold = self.threshold_bytes;
        if let Err(e) = self.paths[SECONDARY].underrun(outputs[SECONDARY].as_deref_mut(), threshold) {
            errors.push(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clocks::ManualClock;
    use crate::core::events::RecordingEventSink;
    use crate::core::metadata::MetadataPayload;

    // Mono 48 kHz 16-bit: 96 bytes per millisecond.
    const FMT: MediaFormat = MediaFormat::new(48_000, 16, 1);
    const MS: usize = 96;

    struct Harness {
        sync: Synchronizer,
        events: RecordingEventSink,
        clock: Arc<ManualClock>,
    }

    fn harness(secondary_started: bool) -> Harness {
        let events = RecordingEventSink::new();
        let clock = Arc::new(ManualClock::new(0));
        let mut sync = Synchronizer::new(
            SyncConfig::default(),
            clock.clone(),
            Box::new(events.clone()),
        );
        for path in SyncPath::ALL {
            sync.open(path, PortDirection::Input, path.index()).unwrap();
            sync.open(path, PortDirection::Output, path.index()).unwrap();
            sync.set_media_format(path, FMT).unwrap();
        }
        sync.start(SyncPath::Primary, PortDirection::Input).unwrap();
        sync.start(SyncPath::Primary, PortDirection::Output).unwrap();
        if secondary_started {
            sync.start(SyncPath::Secondary, PortDirection::Input).unwrap();
            sync.start(SyncPath::Secondary, PortDirection::Output).unwrap();
        }
        sync.set_param(Param::VoiceProcInfo(VoiceProcInfo {
            start_offset_us: 0,
            start_samples_us: 20_000,
            cycle_duration_ms: 20,
            path_delay_us: 1_000,
            is_subscribe: true,
        }))
        .unwrap();
        sync.set_param(Param::ContainerFrameDuration { duration_us: 10_000 })
            .unwrap();
        events.take();
        Harness { sync, events, clock }
    }

    fn data(ms: usize, ts: Option<i64>) -> StreamSegment {
        let bytes = vec![7u8; ms * MS];
        StreamSegment::from_channels(&[&bytes], ts)
    }

    fn out() -> StreamSegment {
        StreamSegment::new(1, 20 * MS)
    }

    fn ttr_nodes(seg: &StreamSegment) -> Vec<(i64, bool, PacketToken)> {
        seg.metadata
            .iter()
            .filter_map(|n| match n.payload {
                MetadataPayload::TargetRenderTime {
                    ttr_us,
                    resync,
                    packet_token,
                } => Some((ttr_us, resync, packet_token)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sizes_from_voice_proc_info() {
        let h = harness(true);
        assert_eq!(h.sync.ring_capacity(SyncPath::Primary), 20 * MS);
        assert_eq!(h.sync.ring_capacity(SyncPath::Secondary), 20 * MS);
        assert_eq!(h.sync.threshold_bytes(), 10 * MS);
    }

    #[test]
    fn test_unconfigured_process_is_not_ready() {
        let mut sync = Synchronizer::new(
            SyncConfig::default(),
            Arc::new(ManualClock::new(0)),
            Box::new(RecordingEventSink::new()),
        );
        sync.open(SyncPath::Primary, PortDirection::Input, 0).unwrap();
        sync.start(SyncPath::Primary, PortDirection::Input).unwrap();
        assert!(matches!(
            sync.process([None, None], [None, None]),
            Err(EngineError::NotReady(_))
        ));
    }

    #[test]
    fn test_first_tick_underruns_silent_secondary() {
        let mut h = harness(true);
        let mut pri = data(20, Some(100_000));
        let outcome = h
            .sync
            .process([Some(&mut pri), None], [None, None])
            .unwrap();
        assert_eq!(outcome.consumed[0], 20 * MS);
        assert_eq!(outcome.state, SyncState::BeforeFirstTick);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 20 * MS);

        h.sync.set_param(Param::FirstProcTick).unwrap();
        let (mut o1, mut o2) = (out(), out());
        let outcome = h
            .sync
            .process([None, None], [Some(&mut o1), Some(&mut o2)])
            .unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.state, SyncState::Syncing);
        assert_eq!(o1.len(), 10 * MS);
        assert_eq!(o2.len(), 10 * MS);
        assert!(o2.flags.erasure);
        assert!(o2.buffers.channel(0).iter().all(|&b| b == 0));
        assert!(!h.sync.zeros_were_padded(SyncPath::Secondary));
        assert_eq!(outcome.trigger_policy, TriggerPolicy::DataTriggered);
        assert!(h.events.events().contains(&EngineEvent::SyncStateChanged {
            from: SyncState::BeforeFirstTick,
            to: SyncState::Syncing,
        }));
    }

    #[test]
    fn test_tick_with_both_paths_reaches_steady_state() {
        let mut h = harness(true);
        h.sync.set_vfr_timestamp(Some(50_000));
        let mut pri = data(15, Some(10_000));
        let mut sec = data(5, Some(20_000));
        h.sync
            .process([Some(&mut pri), Some(&mut sec)], [None, None])
            .unwrap();

        h.sync.set_param(Param::FirstProcTick).unwrap();
        let (mut o1, mut o2) = (out(), out());
        let outcome = h
            .sync
            .process([None, None], [Some(&mut o1), Some(&mut o2)])
            .unwrap();
        // Both rings padded to 20ms: 5ms of zeros on primary, 15ms on secondary.
        assert_eq!(o1.timestamp(), Some(5_000));
        assert!(o1.buffers.channel(0)[..5 * MS].iter().all(|&b| b == 0));
        assert_eq!(o1.buffers.channel(0)[5 * MS], 7);
        assert!(o2.buffers.channel(0).iter().all(|&b| b == 0));
        assert!(h.sync.zeros_were_padded(SyncPath::Secondary));
        assert_eq!(outcome.state, SyncState::Syncing);

        // The render time of the very first frame after start is skipped.
        assert!(ttr_nodes(&o1).is_empty());

        h.sync.set_param(Param::ProcessNotification).unwrap();
        let (mut o1, mut o2) = (out(), out());
        let outcome = h
            .sync
            .process([None, None], [Some(&mut o1), Some(&mut o2)])
            .unwrap();
        assert_eq!(o1.len(), 10 * MS);
        assert_eq!(o2.len(), 10 * MS);
        assert_eq!(outcome.state, SyncState::SteadyState);
        assert_eq!(outcome.trigger_policy, TriggerPolicy::TimerTriggered);
        assert!(h.sync.is_threshold_enabled());
        assert_eq!(ttr_nodes(&o1), vec![(51_000, false, PacketToken::P1)]);
        assert_eq!(h.sync.out_generated_this_cycle(), 0);
    }

    #[test]
    fn test_steady_state_passes_through() {
        let mut h = harness(true);
        let mut pri = data(20, Some(0));
        let mut sec = data(20, Some(0));
        h.sync
            .process([Some(&mut pri), Some(&mut sec)], [None, None])
            .unwrap();
        h.sync.set_param(Param::FirstProcTick).unwrap();
        for _ in 0..2 {
            h.sync.set_param(Param::ProcessNotification).unwrap();
            let (mut o1, mut o2) = (out(), out());
            h.sync
                .process([None, None], [Some(&mut o1), Some(&mut o2)])
                .unwrap();
        }
        assert_eq!(h.sync.state(), SyncState::SteadyState);

        let mut pri = data(10, Some(20_000));
        let mut sec = data(6, Some(20_000));
        let (mut o1, mut o2) = (out(), out());
        let outcome = h
            .sync
            .process([Some(&mut pri), Some(&mut sec)], [Some(&mut o1), Some(&mut o2)])
            .unwrap();
        assert_eq!(outcome.consumed, [10 * MS, 6 * MS]);
        assert_eq!(outcome.produced, [10 * MS, 10 * MS]);
        assert_eq!(o1.timestamp(), Some(20_000));
        assert_eq!(o2.buffers.channel(0)[6 * MS], 0);
    }

    #[test]
    fn test_syncing_clamps_to_remaining_need() {
        let mut h = harness(false);
        let mut pri = data(20, Some(0));
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        h.sync.set_param(Param::FirstProcTick).unwrap();
        let mut o1 = out();
        h.sync.process([None, None], [Some(&mut o1), None]).unwrap();
        assert_eq!(h.sync.state(), SyncState::Syncing);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 10 * MS);

        // The ring already holds the next frame, so the input is left alone.
        h.sync.set_param(Param::ProcessNotification).unwrap();
        let mut pri = data(8, Some(20_000));
        let mut o1 = out();
        let outcome = h
            .sync
            .process([Some(&mut pri), None], [Some(&mut o1), None])
            .unwrap();
        assert_eq!(outcome.consumed[0], 0);
        assert_eq!(o1.len(), 10 * MS);

        // A fresh cycle buffers without clamping.
        let mut pri = data(8, Some(20_000));
        let outcome = h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        assert_eq!(outcome.consumed[0], 8 * MS);
        assert_eq!(h.sync.out_generated_this_cycle(), 0);
    }

    #[test]
    fn test_gap_within_tolerance_pads_zeros() {
        let mut h = harness(false);
        drive_to_syncing(&mut h);

        // 4ms then end of frame: the next data should start at 24ms.
        let mut pri = data(4, Some(20_000));
        pri.flags.end_of_frame = true;
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        assert_eq!(h.sync.next_expected_timestamp(SyncPath::Primary), Some(24_000));
        assert!(!h.sync.is_threshold_enabled());
        assert_eq!(h.sync.buffered(SyncPath::Primary), 4 * MS);

        // Arrives 3ms late: exactly 3ms of zeros go in ahead of it.
        let mut pri = data(1, Some(27_000));
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        assert_eq!(h.sync.state(), SyncState::Syncing);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 4 * MS + 3 * MS + MS);
        assert_eq!(h.sync.next_expected_timestamp(SyncPath::Primary), None);
    }

    #[test]
    fn test_gap_beyond_tolerance_resyncs() {
        let mut h = harness(false);
        drive_to_syncing(&mut h);
        let mut pri = data(4, Some(20_000));
        pri.flags.end_of_frame = true;
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        h.events.take();

        let mut pri = data(1, Some(40_000));
        let outcome = h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        assert_eq!(outcome.state, SyncState::Syncing);
        assert!(!h.sync.zeros_were_padded(SyncPath::Primary));
        // Only the data of the resyncing call is left.
        assert_eq!(h.sync.buffered(SyncPath::Primary), MS);
        assert!(
            h.events
                .events()
                .contains(&EngineEvent::ThresholdBufferingToggled { enabled: false })
        );
    }

    #[test]
    fn test_negative_gap_resyncs() {
        let mut h = harness(false);
        drive_to_syncing(&mut h);
        let mut pri = data(4, Some(20_000));
        pri.flags.end_of_frame = true;
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();

        let mut pri = data(1, Some(23_000));
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        assert_eq!(h.sync.buffered(SyncPath::Primary), MS);
        assert!(!h.sync.zeros_were_padded(SyncPath::Primary));
    }

    #[test]
    fn test_resync_drops_already_generated_output() {
        let mut h = harness(false);
        let mut pri = data(20, Some(0));
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        h.sync.set_param(Param::FirstProcTick).unwrap();
        let mut o1 = out();
        h.sync.process([None, None], [Some(&mut o1), None]).unwrap();
        assert_eq!(h.sync.out_generated_this_cycle(), 10 * MS);

        h.sync.set_param(Param::Resync).unwrap();
        assert_eq!(h.sync.out_to_drop(), 10 * MS);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 0);

        let mut pri = data(20, Some(100_000));
        let outcome = h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        // Mid-cycle, so only one frame is taken.
        assert_eq!(outcome.consumed[0], 10 * MS);

        h.sync.set_param(Param::FirstProcTick).unwrap();
        h.sync.set_param(Param::ProcessNotification).unwrap();
        let mut o1 = out();
        let outcome = h.sync.process([None, None], [Some(&mut o1), None]).unwrap();
        assert!(o1.is_empty());
        assert_eq!(outcome.produced[0], 0);
        assert_eq!(h.sync.out_to_drop(), 0);
        assert_eq!(h.sync.out_generated_this_cycle(), 10 * MS);
    }

    #[test]
    fn test_late_first_frame_resyncs() {
        let mut h = harness(false);
        h.sync.set_vfr_timestamp(Some(1_000));
        h.sync.set_param(Param::FirstProcTick).unwrap();
        h.clock.set_us(3_500);
        h.sync.set_param(Param::ProcessNotification).unwrap();
        assert_eq!(h.sync.state(), SyncState::Syncing);

        let mut h = harness(false);
        h.sync.set_vfr_timestamp(Some(1_000));
        h.sync.set_param(Param::FirstProcTick).unwrap();
        h.clock.set_us(2_500);
        h.sync.set_param(Param::ProcessNotification).unwrap();
        assert_eq!(h.sync.state(), SyncState::BeforeFirstTick);
    }

    #[test]
    fn test_primary_stop_resets_session() {
        let mut h = harness(false);
        drive_to_syncing(&mut h);
        h.sync.stop(SyncPath::Primary, PortDirection::Input);
        assert_eq!(h.sync.state(), SyncState::BeforeFirstTick);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 0);
        assert_eq!(h.sync.out_generated_this_cycle(), 0);
        h.sync.stop(SyncPath::Primary, PortDirection::Input);
        h.sync.close(SyncPath::Primary, PortDirection::Input);
        assert_eq!(h.sync.ring_capacity(SyncPath::Primary), 0);
    }

    #[test]
    fn test_raw_param_validation() {
        let mut h = harness(false);
        assert!(matches!(
            h.sync.set_param_raw(ParamId::VoiceProcInfo, &[0u8; 8]),
            Err(EngineError::NeedMore(_))
        ));
        assert_eq!(h.sync.ring_capacity(SyncPath::Primary), 20 * MS);
        h.sync
            .set_param_raw(ParamId::ContainerFrameDuration, &5_000u32.to_le_bytes())
            .unwrap();
        assert_eq!(h.sync.threshold_bytes(), 5 * MS);
        let raised = h.events.take();
        for port in [0, 1] {
            assert!(raised.contains(&EngineEvent::ThresholdChanged {
                port,
                bytes_per_channel: 5 * MS,
            }));
        }
    }

    /// Release a whole cycle on the primary alone, leaving an empty ring.
    fn drive_to_syncing(h: &mut Harness) {
        let mut pri = data(20, Some(0));
        h.sync.process([Some(&mut pri), None], [None, None]).unwrap();
        h.sync.set_param(Param::FirstProcTick).unwrap();
        let mut o1 = out();
        h.sync.process([None, None], [Some(&mut o1), None]).unwrap();
        assert_eq!(h.sync.state(), SyncState::Syncing);
        h.sync.set_param(Param::ProcessNotification).unwrap();
        let mut o1 = out();
        h.sync.process([None, None], [Some(&mut o1), None]).unwrap();
        assert_eq!(h.sync.out_generated_this_cycle(), 0);
        assert_eq!(h.sync.buffered(SyncPath::Primary), 0);
        h.events.take();
    }
}
