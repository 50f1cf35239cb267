// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// What the renderer does with held data on a timer-triggered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum RenderDecision {
    /// A target render time arrived but nothing was decided yet.
    #[default]
    Pending,

    /// Render time is still ahead. Keep buffering and output silence.
    Hold,

    /// Render time reached. Every later call renders until the next resync.
    Render,

    /// Render time already passed. Held data was discarded.
    Drop,
}

impl RenderDecision {
    pub fn is_pending(&self) -> bool {
        matches!(self, RenderDecision::Pending)
    }

    pub fn is_render(&self) -> bool {
        matches!(self, RenderDecision::Render)
    }

    pub fn description(&self) -> String {
        match self {
            RenderDecision::Pending => "Pending (waiting for a timer trigger)".to_string(),
            RenderDecision::Hold => "Hold (buffering until the render time)".to_string(),
            RenderDecision::Render => "Render (releasing one frame per trigger)".to_string(),
            RenderDecision::Drop => "Drop (render time missed)".to_string(),
        }
    }
}

impl std::fmt::Display for RenderDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderDecision::Pending => write!(f, "Pending"),
            RenderDecision::Hold => write!(f, "Hold"),
            RenderDecision::Render => write!(f, "Render"),
            RenderDecision::Drop => write!(f, "Drop"),
        }
    }
}

/// Result of one renderer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOutcome {
    pub decision: RenderDecision,
    /// Bytes per channel the host drops from the front of the input.
    pub consumed: usize,
    /// Bytes per channel written to the output, silence included.
    pub produced: usize,
}

/// Byte ledger of everything that entered the hold ring.
///
/// `bytes_written` always equals rendered plus dropped plus what is still
/// held. Zero fill written into the ring counts as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RendererStats {
    pub bytes_written: u64,
    pub bytes_rendered: u64,
    pub bytes_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_default_and_display() {
        assert!(RenderDecision::default().is_pending());
        assert_eq!(RenderDecision::Drop.to_string(), "Drop");
        let json = serde_json::to_string(&RenderDecision::Render).unwrap();
        assert_eq!(json, r#"{"type":"Render"}"#);
    }
}
