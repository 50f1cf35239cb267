// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

/// Lifecycle state of one external port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PortState {
    #[default]
    Closed,
    Stopped,
    Started,
}

impl PortState {
    pub fn is_started(&self) -> bool {
        matches!(self, PortState::Started)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, PortState::Closed)
    }
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Closed => write!(f, "Closed"),
            PortState::Stopped => write!(f, "Stopped"),
            PortState::Started => write!(f, "Started"),
        }
    }
}

/// Index binding plus state, shared by input and output ports.
///
/// Repeating start, stop or close is a no-op. Opening an open port is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortLifecycle {
    index: Option<usize>,
    state: PortState,
}

impl PortLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    pub fn open(&mut self, index: usize) -> Result<()> {
        if self.state.is_open() {
            tracing::error!(
                "[PortLifecycle] Port already open at index {:?}, refusing index {}",
                self.index,
                index
            );
            return Err(EngineError::ContractViolation(format!(
                "port already open at index {:?}",
                self.index
            )));
        }
        self.index = Some(index);
        self.state = PortState::Stopped;
        Ok(())
    }

    /// Returns whether the state changed.
    pub fn start(&mut self) -> Result<bool> {
        match self.state {
            PortState::Closed => Err(EngineError::NotReady("start on a closed port".into())),
            PortState::Started => Ok(false),
            PortState::Stopped => {
                self.state = PortState::Started;
                Ok(true)
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        if self.state != PortState::Started {
            return false;
        }
        self.state = PortState::Stopped;
        true
    }

    pub fn close(&mut self) -> bool {
        if self.state == PortState::Closed {
            return false;
        }
        self.state = PortState::Closed;
        self.index = None;
        true
    }
}
