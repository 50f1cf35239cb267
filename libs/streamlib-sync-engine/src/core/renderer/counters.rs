// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Recoverable renderer faults. These repeat every call while the host
/// misbehaves, so they are counted and reported in batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererFault {
    /// Neither input nor output was provided.
    BadArgs,
    /// Called before the hold ring was allocated.
    NoHeldBuffer,
    OutputNotEmpty,
    /// Output cannot hold one frame.
    NotEnoughOutput,
    UnexpectedDecision,
    /// A render call produced nothing and had to be filled with silence.
    UnexpectedUnderrun,
}

/// Fault counters reported at most once per interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    pub bad_args: u32,
    pub no_held_buf: u32,
    pub output_not_empty: u32,
    pub not_enough_output: u32,
    pub unexpected_decision: u32,
    pub unexpected_underrun: u32,
    interval_us: i64,
    last_report_us: Option<i64>,
}

impl ErrorCounters {
    pub fn new(interval_us: i64) -> Self {
        Self {
            interval_us,
            ..Self::default()
        }
    }

    pub fn total(&self) -> u32 {
        self.bad_args
            + self.no_held_buf
            + self.output_not_empty
            + self.not_enough_output
            + self.unexpected_decision
            + self.unexpected_underrun
    }

    /// Count `fault` and report if the interval elapsed. Returns whether a report was logged.
    pub fn record(&mut self, fault: RendererFault, now_us: i64) -> bool {
        let counter = match fault {
            RendererFault::BadArgs => &mut self.bad_args,
            RendererFault::NoHeldBuffer => &mut self.no_held_buf,
            RendererFault::OutputNotEmpty => &mut self.output_not_empty,
            RendererFault::NotEnoughOutput => &mut self.not_enough_output,
            RendererFault::UnexpectedDecision => &mut self.unexpected_decision,
            RendererFault::UnexpectedUnderrun => &mut self.unexpected_underrun,
        };
        *counter = counter.saturating_add(1);
        self.report_if_due(now_us)
    }

    fn report_if_due(&mut self, now_us: i64) -> bool {
        let due = match self.last_report_us {
            None => true,
            Some(last) => now_us - last > self.interval_us,
        };
        if !due {
            return false;
        }
        tracing::warn!(
            "[TimedRenderer] bad args {}, held buffer missing {}, output not empty {}, output too small {}, unexpected decision {}, unexpected underrun {}",
            self.bad_args,
            self.no_held_buf,
            self.output_not_empty,
            self.not_enough_output,
            self.unexpected_decision,
            self.unexpected_underrun
        );
        self.reset();
        self.last_report_us = Some(now_us);
        true
    }

    pub fn reset(&mut self) {
        self.bad_args = 0;
        self.no_held_buf = 0;
        self.output_not_empty = 0;
        self.not_enough_output = 0;
        self.unexpected_decision = 0;
        self.unexpected_underrun = 0;
    }
}
