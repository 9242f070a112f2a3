//! Tracing subscriber initialization, grounded on
//! `ghost-fleet/src/main.rs::init_logging`, trading its CLI flags for
//! [`chomp_core::config::LoggingSettings`] (CLI parsing is out of scope
//! here; `--verbose` becomes `logging.level = "debug"` in config, per
//! `DESIGN.md`).

use chomp_core::config::LoggingSettings;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. `RUST_LOG`, if set, takes
/// precedence over `settings.level`.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.format == "json" {
        registry
            .with(fmt::layer().json())
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init logging: {err}"))
    } else {
        registry
            .with(fmt::layer())
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init logging: {err}"))
    }
}
