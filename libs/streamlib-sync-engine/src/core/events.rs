// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Notifications raised toward the host
//!
//! The host reacts by resizing port buffers, changing how it schedules the
//! next call or adjusting its latency budget.

use std::sync::Arc;

use parking_lot::Mutex;

use super::error::Result;
use super::scheduling::TriggerPolicy;
use super::sync::SyncState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A port's required buffer size changed.
    ThresholdChanged { port: usize, bytes_per_channel: usize },
    TriggerPolicyChanged { policy: TriggerPolicy },
    /// Whether the host should enforce its own threshold buffering.
    ThresholdBufferingToggled { enabled: bool },
    SyncStateChanged { from: SyncState, to: SyncState },
    AlgorithmicDelayChanged { delay_us: i64 },
}

/// Receiver for engine events.
pub trait EventSink: Send {
    fn on_event(&mut self, event: &EngineEvent) -> Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_event(&mut self, _event: &EngineEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps every event, shareable so a test can inspect what the engine raised.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn last_trigger_policy(&self) -> Option<TriggerPolicy> {
        self.events.lock().iter().rev().find_map(|e| match e {
            EngineEvent::TriggerPolicyChanged { policy } => Some(*policy),
            _ => None,
        })
    }
}

impl EventSink for RecordingEventSink {
    fn on_event(&mut self, event: &EngineEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Deliver an event, logging instead of failing the processing call if the sink errors.
pub(crate) fn raise(sink: &mut dyn EventSink, event: EngineEvent) {
    if let Err(e) = sink.on_event(&event) {
        tracing::warn!("[EventSink] Failed to deliver {:?}: {}", event, e);
    }
}
