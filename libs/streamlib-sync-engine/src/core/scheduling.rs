// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// What should wake the host's next `process()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum TriggerPolicy {
    /// Only the periodic tick wakes the host. Arriving buffers wait.
    TimerTriggered,

    /// Arriving buffers wake the host.
    #[default]
    DataTriggered,
}

impl TriggerPolicy {
    pub const fn timer_triggered() -> Self {
        TriggerPolicy::TimerTriggered
    }

    pub const fn data_triggered() -> Self {
        TriggerPolicy::DataTriggered
    }

    pub fn is_timer_triggered(&self) -> bool {
        matches!(self, TriggerPolicy::TimerTriggered)
    }

    pub fn is_data_triggered(&self) -> bool {
        matches!(self, TriggerPolicy::DataTriggered)
    }

    /// Returns a human-readable description of this policy.
    pub fn description(&self) -> String {
        match self {
            TriggerPolicy::TimerTriggered => {
                "TimerTriggered (host waits for the periodic tick)".to_string()
            }
            TriggerPolicy::DataTriggered => {
                "DataTriggered (host wakes on arriving buffers)".to_string()
            }
        }
    }
}

impl std::fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerPolicy::TimerTriggered => write!(f, "TimerTriggered"),
            TriggerPolicy::DataTriggered => write!(f, "DataTriggered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_data_triggered() {
        assert!(TriggerPolicy::default().is_data_triggered());
        assert!(TriggerPolicy::timer_triggered().is_timer_triggered());
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&TriggerPolicy::TimerTriggered).unwrap();
        assert_eq!(json, r#"{"type":"TimerTriggered"}"#);
        let back: TriggerPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TriggerPolicy::TimerTriggered);
        assert_eq!(back.to_string(), "TimerTriggered");
    }
}
