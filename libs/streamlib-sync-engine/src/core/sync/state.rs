// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// Phase of the dual-path synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum SyncState {
    /// Both paths buffer everything until the first periodic tick.
    #[default]
    BeforeFirstTick,

    /// Paths release threshold-sized frames from their rings once per tick.
    Syncing,

    /// Both paths are aligned and data passes straight through.
    SteadyState,
}

impl SyncState {
    pub fn is_before_first_tick(&self) -> bool {
        matches!(self, SyncState::BeforeFirstTick)
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    pub fn is_steady(&self) -> bool {
        matches!(self, SyncState::SteadyState)
    }

    pub fn description(&self) -> String {
        match self {
            SyncState::BeforeFirstTick => "BeforeFirstTick (buffering until the first tick)".to_string(),
            SyncState::Syncing => "Syncing (releasing buffered frames per tick)".to_string(),
            SyncState::SteadyState => "SteadyState (pass-through)".to_string(),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::BeforeFirstTick => write!(f, "BeforeFirstTick"),
            SyncState::Syncing => write!(f, "Syncing"),
            SyncState::SteadyState => write!(f, "SteadyState"),
        }
    }
}

/// Which of the two synchronized paths an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPath {
    Primary,
    Secondary,
}

impl SyncPath {
    pub const ALL: [SyncPath; 2] = [SyncPath::Primary, SyncPath::Secondary];

    pub fn index(&self) -> usize {
        match self {
            SyncPath::Primary => 0,
            SyncPath::Secondary => 1,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, SyncPath::Primary)
    }
}

impl std::fmt::Display for SyncPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPath::Primary => write!(f, "primary"),
            SyncPath::Secondary => write!(f, "secondary"),
        }
    }
}

/// Side of a path a port lifecycle call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert!(SyncState::default().is_before_first_tick());
        assert_eq!(SyncState::SteadyState.to_string(), "SteadyState");
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&SyncState::Syncing).unwrap();
        assert_eq!(json, r#"{"type":"Syncing"}"#);
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert!(back.is_syncing());
    }

    #[test]
    fn test_path_index() {
        assert_eq!(SyncPath::Primary.index(), 0);
        assert_eq!(SyncPath::Secondary.index(), 1);
        assert!(!SyncPath::Secondary.is_primary());
    }
}
