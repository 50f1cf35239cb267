// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Metadata ledger
//!
//! Offset-tagged events that travel with stream data: end of stream,
//! data-flow gaps, target render times and module-defined values.

mod list;
mod node;
mod propagate;
mod value;

pub use list::{DropReason, MetadataList};
pub use node::{
    MetadataAssociation, MetadataFlags, MetadataId, MetadataNode, MetadataPayload, PacketToken,
};
pub use propagate::{MetadataCarrier, PropagationResult, PropagationSpan, propagate};
pub use value::MetadataValue;
