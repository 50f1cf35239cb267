// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Storage for a port or ring buffer could not be allocated.
    #[error("Resource exhausted: could not allocate {bytes} bytes for {what}")]
    ResourceExhausted { what: String, bytes: usize },

    /// Parameter payload was malformed. No state was changed.
    #[error("Bad parameter {id}: {reason}")]
    BadParam { id: String, reason: String },

    /// Not enough payload or no pooled buffer available right now. Retry later.
    #[error("Need more: {0}")]
    NeedMore(String),

    /// The timed renderer's hold horizon was exceeded.
    #[error("Render ring overflow: all {frames} frames are full")]
    Overflow { frames: usize },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Buffer operation failed: {0}")]
    BufferError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for conditions the host should simply retry on its next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::NeedMore(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
