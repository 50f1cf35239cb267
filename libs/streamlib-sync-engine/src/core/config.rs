// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Engine Configuration Types
//!
//! Tunables for the synchronizer, the timed renderer and the output pool.
//! Every section has a working default, so a config file only needs the
//! fields it overrides.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub sync: SyncConfig,
    pub renderer: RendererConfig,
}

/// Configuration for external output ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Buffers each output port keeps in its pool
    pub output_pool_depth: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            output_pool_depth: 4,
        }
    }
}

/// Configuration for the dual-path synchronizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest timestamp gap repaired with zeros instead of a full resync
    pub ts_repair_tolerance_us: i64,
    /// First-frame lateness relative to the tick that forces a resync
    pub first_tick_jitter_threshold_us: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ts_repair_tolerance_us: 5_000,
            first_tick_jitter_threshold_us: 2_000,
        }
    }
}

/// Configuration for the timed renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Frame slots in the hold ring
    pub num_frames: usize,
    /// How late a target render time may be before the held data is dropped
    pub jitter_tolerance_us: i64,
    /// Minimum spacing between error counter reports
    pub error_log_interval_us: i64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            num_frames: 20,
            jitter_tolerance_us: 1_000,
            error_log_interval_us: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EngineError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| EngineError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| EngineError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let config = match ext.as_deref() {
            Some("toml") => Self::from_toml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text)?,
            _ => {
                return Err(EngineError::Configuration(format!(
                    "unsupported config extension: {}",
                    path.display()
                )));
            }
        };

        tracing::info!("[EngineConfig] Loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer.output_pool_depth == 0 {
            return Err(EngineError::Configuration(
                "buffer.output_pool_depth must be at least 1".into(),
            ));
        }
        if self.renderer.num_frames < 2 {
            return Err(EngineError::Configuration(
                "renderer.num_frames must be at least 2".into(),
            ));
        }
        if self.renderer.jitter_tolerance_us < 0 || self.renderer.error_log_interval_us < 0 {
            return Err(EngineError::Configuration(
                "renderer intervals must not be negative".into(),
            ));
        }
        if self.sync.ts_repair_tolerance_us < 0 || self.sync.first_tick_jitter_threshold_us <= 0 {
            return Err(EngineError::Configuration(
                "sync tolerances must be positive".into(),
            ));
        }
        Ok(())
    }
}
