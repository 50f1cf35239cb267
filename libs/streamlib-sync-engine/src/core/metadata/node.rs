// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use super::MetadataValue;

/// What a node's offset is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MetadataAssociation {
    /// Tied to a specific sample. Shifted by algorithmic delay when crossing a module.
    #[default]
    Sample,
    /// Tied to the buffer that carries it. Never delayed.
    Buffer,
    /// Tied to the stream as a whole. Survives flushes that keep stream state.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MetadataFlags {
    pub association: MetadataAssociation,
    /// Lands at the start of the output when nothing was consumed.
    pub begin_associated: bool,
}

impl MetadataFlags {
    pub fn is_buffer_associated(&self) -> bool {
        self.association == MetadataAssociation::Buffer
    }
}

/// Cycle slot carried by target-render-time metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PacketToken {
    #[default]
    P1,
    P2,
}

impl PacketToken {
    pub fn next(self) -> Self {
        match self {
            PacketToken::P1 => PacketToken::P2,
            PacketToken::P2 => PacketToken::P1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataId {
    EndOfStream,
    DataFlowGap,
    TargetRenderTime,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataPayload {
    /// `flushing` streams must drain every buffered and delayed sample before leaving.
    EndOfStream { flushing: bool },
    /// Upstream stopped producing. Meaningless once real data follows it.
    DataFlowGap,
    TargetRenderTime {
        ttr_us: i64,
        resync: bool,
        packet_token: PacketToken,
    },
    Custom { key: String, value: MetadataValue },
}

/// One offset-tagged event in a ledger.
///
/// `offset` is in samples from the start of whatever buffer currently owns
/// the node and must be re-based on every move.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataNode {
    pub offset: usize,
    pub flags: MetadataFlags,
    pub payload: MetadataPayload,
}

impl MetadataNode {
    pub fn new(offset: usize, flags: MetadataFlags, payload: MetadataPayload) -> Self {
        Self {
            offset,
            flags,
            payload,
        }
    }

    pub fn end_of_stream(offset: usize, flushing: bool) -> Self {
        Self::new(
            offset,
            MetadataFlags {
                association: MetadataAssociation::Stream,
                begin_associated: false,
            },
            MetadataPayload::EndOfStream { flushing },
        )
    }

    pub fn data_flow_gap(offset: usize) -> Self {
        Self::new(offset, MetadataFlags::default(), MetadataPayload::DataFlowGap)
    }

    pub fn target_render_time(ttr_us: i64, resync: bool, packet_token: PacketToken) -> Self {
        Self::new(
            0,
            MetadataFlags {
                association: MetadataAssociation::Buffer,
                begin_associated: true,
            },
            MetadataPayload::TargetRenderTime {
                ttr_us,
                resync,
                packet_token,
            },
        )
    }

    pub fn custom(offset: usize, key: impl Into<String>, value: MetadataValue) -> Self {
        Self::new(
            offset,
            MetadataFlags::default(),
            MetadataPayload::Custom {
                key: key.into(),
                value,
            },
        )
    }

    pub fn id(&self) -> MetadataId {
        match self.payload {
            MetadataPayload::EndOfStream { .. } => MetadataId::EndOfStream,
            MetadataPayload::DataFlowGap => MetadataId::DataFlowGap,
            MetadataPayload::TargetRenderTime { .. } => MetadataId::TargetRenderTime,
            MetadataPayload::Custom { .. } => MetadataId::Custom,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.id() == MetadataId::EndOfStream
    }

    pub fn is_flushing_eos(&self) -> bool {
        matches!(self.payload, MetadataPayload::EndOfStream { flushing: true })
    }

    pub fn is_stream_eos(&self) -> bool {
        self.is_eos() && self.flags.association == MetadataAssociation::Stream
    }

    pub fn is_data_flow_gap(&self) -> bool {
        self.id() == MetadataId::DataFlowGap
    }

    /// Subtract `by`, clamping at zero. An underflow means upstream offset
    /// bookkeeping went wrong, so it is logged.
    pub fn rebase_down(&mut self, by: usize) {
        match self.offset.checked_sub(by) {
            Some(offset) => self.offset = offset,
            None => {
                tracing::warn!(
                    "[MetadataNode] {:?} offset {} underflows by {}, clamping to 0",
                    self.id(),
                    self.offset,
                    by - self.offset
                );
                self.offset = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let eos = MetadataNode::end_of_stream(10, true);
        assert!(eos.is_flushing_eos());
        assert!(eos.is_stream_eos());

        let ttr = MetadataNode::target_render_time(5_000, false, PacketToken::P1);
        assert!(ttr.flags.is_buffer_associated());
        assert!(ttr.flags.begin_associated);
        assert_eq!(ttr.id(), MetadataId::TargetRenderTime);
    }

    #[test]
    fn test_rebase_down_saturates() {
        let mut node = MetadataNode::data_flow_gap(5);
        node.rebase_down(3);
        assert_eq!(node.offset, 2);
        node.rebase_down(10);
        assert_eq!(node.offset, 0);
    }

    #[test]
    fn test_token_cycles() {
        assert_eq!(PacketToken::P1.next(), PacketToken::P2);
        assert_eq!(PacketToken::P2.next(), PacketToken::P1);
    }
}
