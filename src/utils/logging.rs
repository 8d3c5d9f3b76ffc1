use anyhow::{Result, anyhow};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::utils::config::LoggingConfig;

/// Overrides the configured level when set, with `EnvFilter` syntax.
pub const LOG_ENV: &str = "VISIUM_LOG";

/// Installs the global subscriber. Call once, from the binary.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| anyhow!("invalid log level {:?}: {err}", config.level))?;

    let registry = Registry::default().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;

    tracing::info!(level = %config.level, json = config.json, "logging initialized");
    Ok(())
}
