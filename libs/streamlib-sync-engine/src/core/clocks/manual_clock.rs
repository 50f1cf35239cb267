// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Clock whose time only moves when told to.
///
/// Cloning shares the underlying counter, so a test can keep one handle and
/// hand another to the synchronizer or renderer.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: Arc::new(AtomicI64::new(start_us)),
        }
    }

    pub fn set_us(&self, us: i64) {
        self.now_us.store(us, Ordering::SeqCst);
    }

    pub fn advance_us(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst) * 1_000
    }

    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn description(&self) -> &str {
        "Manual Clock"
    }
}
