// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod buffers;
pub mod clocks;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod media_format;
pub mod metadata;
pub mod params;
pub mod ports;
pub mod renderer;
pub mod scheduling;
pub mod stream;
pub mod sync;

pub use error::*;
pub use media_format::*;
pub use scheduling::*;
