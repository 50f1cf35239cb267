// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Timed renderer
//!
//! Holds processed audio in a ring of frames until its target render
//! time, then releases one frame per timer trigger.

mod counters;
mod decision;
mod timed_renderer;

pub use counters::{ErrorCounters, RendererFault};
pub use decision::{RenderDecision, RenderOutcome, RendererStats};
pub use timed_renderer::TimedRenderer;
