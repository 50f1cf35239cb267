// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Monotonic wall clock expressed in the host's timestamp domain.
///
/// Render times arrive as host timestamps (tick time plus path delays), so
/// the clock is anchored to a host value rather than the Unix epoch. The
/// anchor can be moved while the clock is shared, which is how a host
/// realigns after its tick source jumps.
#[derive(Debug)]
pub struct SoftwareClock {
    start: Instant,
    // Host time, in nanoseconds, at `start`.
    base_ns: AtomicI64,
}

impl SoftwareClock {
    /// Clock reading 0 at construction.
    pub fn new() -> Self {
        Self::anchored_at_us(0)
    }

    pub fn anchored_at_us(now_us: i64) -> Self {
        Self {
            start: Instant::now(),
            base_ns: AtomicI64::new(now_us.saturating_mul(1_000)),
        }
    }

    /// Make the clock read `now_us` from this instant on.
    pub fn realign_us(&self, now_us: i64) {
        let base = now_us.saturating_mul(1_000) - self.elapsed_ns();
        let previous = self.base_ns.swap(base, Ordering::SeqCst);
        tracing::debug!(
            "[SoftwareClock] Realigned by {}us",
            (base - previous) / 1_000
        );
    }

    fn elapsed_ns(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl Default for SoftwareClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SoftwareClock {
    fn now_ns(&self) -> i64 {
        self.base_ns
            .load(Ordering::SeqCst)
            .saturating_add(self.elapsed_ns())
    }

    fn description(&self) -> &str {
        "Software Clock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_software_clock_monotonic() {
        let clock = SoftwareClock::anchored_at_us(50_000);
        let t1 = clock.now_us();
        assert!(t1 >= 50_000);
        thread::sleep(Duration::from_millis(2));
        let t2 = clock.now_us();
        assert!(t2 - t1 >= 2_000);
    }

    #[test]
    fn test_realign_through_shared_handle() {
        let clock = Arc::new(SoftwareClock::new());
        let shared: Arc<dyn Clock> = clock.clone();

        clock.realign_us(1_000_000);
        let now = shared.now_us();
        assert!((1_000_000..1_100_000).contains(&now), "read {now}");

        clock.realign_us(-5_000_000);
        assert!(shared.now_us() < 0);
    }
}
