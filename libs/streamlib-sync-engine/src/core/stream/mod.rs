// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod arena;
mod flags;
mod segment;

pub use arena::ChannelArena;
pub use flags::StreamFlags;
pub use segment::StreamSegment;
