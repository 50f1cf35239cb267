// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock trait - wall-clock reference for render and jitter decisions
//!
//! The engine never sleeps on a clock. It samples one when a decision needs
//! the current time (first-tick jitter check, render deadline comparison).

/// Passive time source sampled by the synchronizer and the timed renderer.
///
/// Implementations must be monotonic and safe to read from any thread.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since an arbitrary epoch.
    fn now_ns(&self) -> i64;

    /// Current time in microseconds, the unit every engine timestamp uses.
    fn now_us(&self) -> i64 {
        self.now_ns() / 1_000
    }

    /// Human-readable clock description for logs.
    fn description(&self) -> &str;
}
