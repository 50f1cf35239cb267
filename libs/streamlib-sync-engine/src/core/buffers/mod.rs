// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod circular;
mod frame_ring;

pub use circular::CircularBuffer;
pub use frame_ring::{FrameRing, RenderFrame};
