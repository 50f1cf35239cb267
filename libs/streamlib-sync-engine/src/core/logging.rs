// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::error::Result;

/// Install a fmt subscriber for hosts that have not set one up.
///
/// `filter` takes precedence over `RUST_LOG`; with neither, `info` is used.
/// Returns `Ok(false)` without touching anything when a global subscriber
/// already exists.
pub fn init_logging(filter: Option<&str>) -> Result<bool> {
    let env_filter = match filter {
        Some(directives) => EnvFilter::try_new(directives).map_err(|e| {
            super::error::EngineError::Configuration(format!("invalid log filter: {e}"))
        })?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("[Logging] Subscriber installed");
    }
    Ok(installed)
}
