// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Dual-path synchronization
//!
//! A primary and a secondary path are buffered until the periodic tick,
//! released with leading zeros so they line up, then passed through once a
//! whole cycle has been produced.

mod path;
mod state;
mod synchronizer;

pub use state::{PortDirection, SyncPath, SyncState};
pub use synchronizer::{ProcessOutcome, Synchronizer};
