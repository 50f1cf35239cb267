// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use super::pool::{OutputPool, PooledBuffer};
use super::state::{PortLifecycle, PortState};
use crate::core::error::{EngineError, Result};
use crate::core::media_format::MediaFormat;
use crate::core::metadata::{DropReason, MetadataCarrier, MetadataList};
use crate::core::stream::{StreamFlags, StreamSegment};

/// State the downstream consumer reports back through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PropagatedState {
    #[default]
    Stopped,
    Prepared,
    Started,
}

/// The consumer connected to an external output port.
pub trait Downstream {
    fn propagated_state(&self) -> PropagatedState;

    fn push(&mut self, buffer: PooledBuffer) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    NoDownstream,
    NotStarted,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { bytes_per_channel: usize },
    /// The buffer went back to the pool.
    Dropped(DropCause),
    /// No buffer was held.
    Idle,
}

#[derive(Debug)]
pub struct ExternalOutputPort {
    lifecycle: PortLifecycle,
    media_format: MediaFormat,
    pool_depth: usize,
    bytes_per_channel: usize,
    pool: Option<OutputPool>,
    held: Option<PooledBuffer>,
    metadata: MetadataList,
    flags: StreamFlags,
}

impl ExternalOutputPort {
    pub fn new(pool_depth: usize) -> Self {
        Self {
            lifecycle: PortLifecycle::new(),
            media_format: MediaFormat::default(),
            pool_depth,
            bytes_per_channel: 0,
            pool: None,
            held: None,
            metadata: MetadataList::new(),
            flags: StreamFlags::new(),
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

    pub fn pool(&self) -> Option<&OutputPool> {
        self.pool.as_ref()
    }

    pub fn metadata(&self) -> &MetadataList {
        &self.metadata
    }

    pub fn open(&mut self, index: usize) -> Result<()> {
        self.lifecycle.open(index)?;
        tracing::info!("[ExternalOutputPort] Opened at index {}", index);
        Ok(())
    }

    pub fn start(&mut self) -> Result<bool> {
        self.lifecycle.start()
    }

    pub fn stop(&mut self) -> bool {
        if !self.lifecycle.stop() {
            return false;
        }
        self.discard();
        tracing::info!("[ExternalOutputPort] {:?} stopped", self.index());
        true
    }

    pub fn close(&mut self) -> bool {
        let index = self.index();
        if !self.lifecycle.close() {
            return false;
        }
        self.discard();
        self.pool = None;
        tracing::info!("[ExternalOutputPort] {:?} closed", index);
        true
    }

    fn discard(&mut self) {
        self.held = None;
        self.metadata.destroy_all(DropReason::Dropped);
        self.flags.clear();
    }

    /// Recreate the pool when the format or buffer size changed.
    pub fn configure(&mut self, format: MediaFormat, bytes_per_channel: usize) -> Result<bool> {
        if !format.is_valid() {
            return Err(EngineError::NotReady(format!(
                "invalid media format {format}"
            )));
        }
        if self.pool.is_some()
            && self.media_format == format
            && self.bytes_per_channel == bytes_per_channel
        {
            return Ok(false);
        }

        let pool = OutputPool::new(self.pool_depth, format.channels(), bytes_per_channel)?;
        self.held = None;
        self.pool = Some(pool);
        self.media_format = format;
        self.bytes_per_channel = bytes_per_channel;
        tracing::info!(
            "[ExternalOutputPort] {:?} pool of {} x {} bytes/ch ({})",
            self.index(),
            self.pool_depth,
            bytes_per_channel,
            format
        );
        Ok(true)
    }

    /// Take a buffer from the pool for the pipeline to write into.
    pub fn acquire_output(&mut self) -> Result<&mut StreamSegment> {
        if self.held.is_some() {
            tracing::error!(
                "[ExternalOutputPort] {:?} acquire while a buffer is already held",
                self.index()
            );
            return Err(EngineError::ContractViolation(
                "output buffer already held".into(),
            ));
        }
        let Some(pool) = &self.pool else {
            return Err(EngineError::NotReady("output port has no pool".into()));
        };
        let buffer = pool.acquire()?;
        Ok(&mut **self.held.insert(buffer))
    }

    pub fn output_mut(&mut self) -> Option<&mut StreamSegment> {
        self.held.as_deref_mut()
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Return the held buffer without delivering it.
    pub fn release_output(&mut self) -> bool {
        self.held.take().is_some()
    }

    /// Hand the held buffer downstream, or return it to the pool when
    /// nobody can take it.
    pub fn deliver_or_drop(&mut self, downstream: Option<&mut dyn Downstream>) -> Result<Delivery> {
        let Some(mut buffer) = self.held.take() else {
            return Ok(Delivery::Idle);
        };

        let len = buffer.len();
        let end = self.media_format.bytes_to_samples(len);
        let carries_metadata = self.metadata.iter().any(|node| node.offset <= end);
        let cause = match &downstream {
            None => Some(DropCause::NoDownstream),
            Some(d) if d.propagated_state() != PropagatedState::Started => {
                Some(DropCause::NotStarted)
            }
            Some(_) if buffer.is_vacant() && !carries_metadata => Some(DropCause::Empty),
            Some(_) => None,
        };

        let (Some(downstream), None) = (downstream, cause) else {
            let cause = cause.unwrap_or(DropCause::NoDownstream);
            let destroyed = self.metadata.destroy_all(DropReason::Dropped);
            self.flags.marker_eos = false;
            tracing::debug!(
                "[ExternalOutputPort] {:?} dropping {} bytes/ch and {} metadata ({:?})",
                self.index(),
                len,
                destroyed,
                cause
            );
            return Ok(Delivery::Dropped(cause));
        };

        // Nodes past the delivered span stay behind, rebased to the next buffer.
        let moved = self
            .metadata
            .move_where(&mut buffer.metadata, |node| node.offset <= end);
        self.metadata.subtract_offsets(end);
        if moved > 0 && buffer.metadata.has_eos() {
            buffer.flags.marker_eos = true;
        }
        self.flags.marker_eos = self.metadata.has_eos();

        buffer.buffers.pack();
        downstream.push(buffer)?;
        Ok(Delivery::Delivered {
            bytes_per_channel: len,
        })
    }
}

impl MetadataCarrier for ExternalOutputPort {
    fn ledger(&mut self) -> (&mut MetadataList, &mut StreamFlags) {
        (&mut self.metadata, &mut self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::MetadataNode;

    const FMT: MediaFormat = MediaFormat::pcm_48k_stereo_16();

    #[derive(Default)]
    struct Sink {
        state: PropagatedState,
        received: Vec<(Vec<u8>, bool, usize)>,
    }

    impl Downstream for Sink {
        fn propagated_state(&self) -> PropagatedState {
            self.state
        }

        fn push(&mut self, mut buffer: PooledBuffer) -> Result<()> {
            let eos = buffer.flags.marker_eos;
            let nodes = buffer.metadata.len();
            let bytes = buffer.buffers.pack().to_vec();
            self.received.push((bytes, eos, nodes));
            Ok(())
        }
    }

    fn port() -> ExternalOutputPort {
        let mut port = ExternalOutputPort::new(2);
        port.open(0).unwrap();
        port.start().unwrap();
        port.configure(FMT, 8).unwrap();
        port
    }

    #[test]
    fn test_double_acquire_is_contract_violation() {
        let mut port = port();
        port.acquire_output().unwrap();
        assert!(matches!(
            port.acquire_output(),
            Err(EngineError::ContractViolation(_))
        ));
        assert!(port.release_output());
        assert!(port.acquire_output().is_ok());
    }

    #[test]
    fn test_deliver_packs_and_moves_metadata() {
        let mut port = port();
        let out = port.acquire_output().unwrap();
        out.buffers.append_slices(&[&[1, 2], &[3, 4]]);
        port.metadata.create(MetadataNode::end_of_stream(1, true));
        port.metadata.create(MetadataNode::custom(9, "later", 1i64.into()));
        port.flags.marker_eos = true;

        let mut sink = Sink {
            state: PropagatedState::Started,
            ..Default::default()
        };
        let delivery = port.deliver_or_drop(Some(&mut sink)).unwrap();
        assert_eq!(delivery, Delivery::Delivered { bytes_per_channel: 2 });
        assert_eq!(sink.received, vec![(vec![1, 2, 3, 4], true, 1)]);
        assert_eq!(port.metadata().len(), 1);
        // One sample went out, so the leftover sits one sample closer.
        assert_eq!(port.metadata().iter().next().map(|n| n.offset), Some(8));
        assert!(!port.flags.marker_eos);
        assert_eq!(port.pool().map(OutputPool::available), Some(2));
    }

    #[test]
    fn test_drop_rules() {
        let mut port = port();
        port.acquire_output().unwrap().buffers.append_zeros(2);
        assert_eq!(
            port.deliver_or_drop(None).unwrap(),
            Delivery::Dropped(DropCause::NoDownstream)
        );

        let mut prepared = Sink {
            state: PropagatedState::Prepared,
            ..Default::default()
        };
        port.acquire_output().unwrap().buffers.append_zeros(2);
        assert_eq!(
            port.deliver_or_drop(Some(&mut prepared)).unwrap(),
            Delivery::Dropped(DropCause::NotStarted)
        );

        let mut started = Sink {
            state: PropagatedState::Started,
            ..Default::default()
        };
        port.acquire_output().unwrap();
        assert_eq!(
            port.deliver_or_drop(Some(&mut started)).unwrap(),
            Delivery::Dropped(DropCause::Empty)
        );
        assert_eq!(port.deliver_or_drop(Some(&mut started)).unwrap(), Delivery::Idle);
        assert_eq!(port.pool().map(OutputPool::available), Some(2));
    }

    #[test]
    fn test_leftover_offsets_drop_by_delivered_length() {
        let mut port = port();
        port.acquire_output()
            .unwrap()
            .buffers
            .append_slices(&[&[1, 2, 3, 4], &[5, 6, 7, 8]]);
        port.metadata.create(MetadataNode::custom(5, "position", 5i64.into()));

        let mut sink = Sink {
            state: PropagatedState::Started,
            ..Default::default()
        };
        // 4 bytes/ch of 16-bit audio = 2 samples.
        port.deliver_or_drop(Some(&mut sink)).unwrap();
        assert_eq!(sink.received[0].2, 0);
        assert_eq!(port.metadata().iter().next().map(|n| n.offset), Some(3));
    }

    #[test]
    fn test_drop_destroys_whole_ledger() {
        let mut port = port();
        for downstream_state in [None, Some(PropagatedState::Prepared)] {
            port.acquire_output().unwrap().buffers.append_zeros(2);
            port.metadata.create(MetadataNode::end_of_stream(0, true));
            port.metadata.create(MetadataNode::data_flow_gap(0));
            port.metadata.create(MetadataNode::custom(40, "later", 1i64.into()));
            port.flags.marker_eos = true;

            let mut sink = downstream_state.map(|state| Sink {
                state,
                ..Default::default()
            });
            let delivery = port
                .deliver_or_drop(sink.as_mut().map(|s| s as &mut dyn Downstream))
                .unwrap();
            assert!(matches!(delivery, Delivery::Dropped(_)));
            assert!(port.metadata().is_empty());
            assert!(!port.flags.marker_eos);
        }
        assert_eq!(port.pool().map(OutputPool::available), Some(2));
    }

    #[test]
    fn test_configure_only_on_change() {
        let mut port = port();
        assert!(!port.configure(FMT, 8).unwrap());
        assert!(port.configure(FMT, 16).unwrap());
        assert_eq!(port.pool().map(OutputPool::buffer_capacity), Some(16));
    }
}
