// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// Per-segment state bits, one named field each. All default to false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StreamFlags {
    /// `timestamp` on the owning segment is meaningful.
    pub timestamp_valid: bool,
    /// Upstream ended this frame early. Without `marker_eos` this marks a discontinuity.
    pub end_of_frame: bool,
    /// The ledger carries an end-of-stream node.
    pub marker_eos: bool,
    /// Payload is synthesized silence, not real data.
    pub erasure: bool,
}

impl StreamFlags {
    pub const fn new() -> Self {
        Self {
            timestamp_valid: false,
            end_of_frame: false,
            marker_eos: false,
            erasure: false,
        }
    }

    pub const fn with_timestamp() -> Self {
        Self {
            timestamp_valid: true,
            end_of_frame: false,
            marker_eos: false,
            erasure: false,
        }
    }

    /// End of frame that is not explained by an end-of-stream.
    pub fn is_discontinuity(&self) -> bool {
        self.end_of_frame && !self.marker_eos
    }

    /// Bitwise OR of every field, used when several sources fill one output.
    pub fn merge(&mut self, other: &StreamFlags) {
        self.timestamp_valid |= other.timestamp_valid;
        self.end_of_frame |= other.end_of_frame;
        self.marker_eos |= other.marker_eos;
        self.erasure |= other.erasure;
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discontinuity_requires_missing_eos() {
        let mut flags = StreamFlags::new();
        flags.end_of_frame = true;
        assert!(flags.is_discontinuity());
        flags.marker_eos = true;
        assert!(!flags.is_discontinuity());
    }

    #[test]
    fn test_merge() {
        let mut a = StreamFlags::with_timestamp();
        let b = StreamFlags {
            erasure: true,
            ..StreamFlags::new()
        };
        a.merge(&b);
        assert!(a.timestamp_valid && a.erasure);
        a.clear();
        assert_eq!(a, StreamFlags::default());
    }
}
