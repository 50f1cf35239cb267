// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! External port buffer management
//!
//! Input ports absorb arbitrarily sized segments into a threshold-sized
//! local buffer. Output ports loan pooled buffers to the pipeline and
//! deliver or return them.

mod input;
mod output;
mod pool;
mod state;
mod timestamp;

pub use input::{BufferOutcome, DownstreamRequirement, ExternalInputPort, HeldSegment, RequiredSize};
pub use output::{Delivery, DropCause, Downstream, ExternalOutputPort, PropagatedState};
pub use pool::{OutputPool, PooledBuffer};
pub use state::{PortLifecycle, PortState};
pub use timestamp::{TimestampInfo, TimestampTracker};
