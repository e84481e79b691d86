//! Logging setup.
//!
//! The library itself only emits `tracing` events; binaries and tests call
//! [`init_logging`] once to route them somewhere.

use crate::config::LoggingConfig;
use crate::errors::StageGraphError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber for `config`.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`. Returns
/// `false` if a global subscriber was already installed, in which case
/// nothing changes.
///
/// # Errors
///
/// `Config` if the level directive does not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, StageGraphError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(&directive)
            .map_err(|err| StageGraphError::Config(format!("invalid RUST_LOG '{directive}': {err}")))?,
        _ => config.env_filter()?,
    };

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default().with_level("stagegraph=debug");
        init_logging(&config).unwrap();
        // a subscriber is in place now, whoever installed it
        assert!(!init_logging(&config).unwrap());
        tracing::info!(subject = "img", "logging initialised");
    }
}
