// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Streaming buffer and dual-path synchronization engine.
//!
//! Absorbs mismatches between arbitrary message boundaries and a fixed
//! processing frame, aligns two asynchronous input paths to a periodic
//! tick and holds rendered audio until a target render time.

#![allow(clippy::too_many_arguments)] // Process entry points mirror the host callback shape

pub mod core;

pub use crate::core::{
    buffers::{CircularBuffer, FrameRing, RenderFrame},
    clocks::{Clock, ManualClock, SoftwareClock},
    config::{BufferConfig, EngineConfig, RendererConfig, SyncConfig},
    error::{EngineError, Result},
    events::{EngineEvent, EventSink, NullEventSink, RecordingEventSink},
    logging::init_logging,
    media_format::MediaFormat,
    metadata::{
        DropReason, MetadataAssociation, MetadataCarrier, MetadataFlags, MetadataId, MetadataList,
        MetadataNode, MetadataPayload, MetadataValue, PacketToken, PropagationResult,
        PropagationSpan, propagate,
    },
    params::{Param, ParamId, VoiceProcInfo},
    ports::{
        BufferOutcome, Delivery, DropCause, Downstream, DownstreamRequirement, ExternalInputPort,
        ExternalOutputPort, HeldSegment, OutputPool, PooledBuffer, PortLifecycle, PortState,
        PropagatedState, RequiredSize, TimestampTracker,
    },
    renderer::{
        ErrorCounters, RenderDecision, RenderOutcome, RendererFault, RendererStats, TimedRenderer,
    },
    scheduling::TriggerPolicy,
    stream::{ChannelArena, StreamFlags, StreamSegment},
    sync::{PortDirection, ProcessOutcome, SyncPath, SyncState, Synchronizer},
};
