//! Logging setup for host applications
//!
//! The library only emits `tracing` events. A host (wasm shell, desktop app,
//! test harness) either installs its own subscriber or calls [`init`].

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "chatstream_core=info";

/// Install a formatted subscriber filtered by `RUST_LOG`
///
/// # Errors
///
/// Fails if a global subscriber is already installed or `RUST_LOG` holds an
/// invalid directive.
pub fn init() -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(DEFAULT_FILTER)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::debug!("Logging initialized");
    Ok(())
}
