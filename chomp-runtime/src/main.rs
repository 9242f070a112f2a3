//! Chomp — process entrypoint for the ingestion fleet.
//!
//! Grounded on `ghost-fleet/src/main.rs`'s shape (init logging, load
//! config, build the service, run until a shutdown signal), thinned per
//! §1's non-goal on CLI argument parsing and the `.yaml`/`.proto` config
//! loader: every `--flag` §6 names (`--proc_id`, `--threaded`,
//! `--tsdb_adapter`, `--max_retries`, `--ingestion_timeout`, ...) is a
//! [`chomp_core::config::Settings`] field instead, sourced from
//! `config/*.toml` and `CHOMP__`-prefixed environment variables. The one
//! thing this binary still takes from the command line is the ingester
//! roster path, since loading *that* file's schema is in scope (§3) even
//! though the general-purpose loader isn't.
//!
//! # Usage
//!
//! ```bash
//! chomp path/to/ingesters.json
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};

mod logging;
mod roster;
mod sink;
mod wiring;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = std::env::var("CHOMP_ENV").unwrap_or_else(|_| "development".to_string());
    let settings = chomp_core::config::Settings::load(&environment)
        .map_err(|err| anyhow::anyhow!("failed to load configuration: {err}"))?;

    logging::init(&settings.logging)?;

    if let Err(errors) = settings.validate() {
        for err in &errors {
            error!(error = %err, "invalid configuration");
        }
        anyhow::bail!("configuration failed validation with {} error(s)", errors.len());
    }

    info!(
        proc_id = %settings.instance.proc_id,
        stand_alone = settings.claim.stand_alone,
        worker_pool_size = settings.scheduler.worker_pool_size,
        tsdb_adapter = %settings.storage.tsdb_adapter,
        "starting chomp"
    );

    let roster_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: chomp <ingesters.json>"))?;
    let defs = roster::load(&roster_path).map_err(|err| anyhow::anyhow!("failed to load ingester roster: {err}"))?;
    info!(count = defs.len(), path = %roster_path, "loaded ingester roster");

    let sink: Arc<dyn chomp_core::ports::TimeSeriesSink> = Arc::new(sink::LoggingSink::new());
    let fleet = wiring::build(&settings, defs, sink)
        .await
        .map_err(|err| anyhow::anyhow!("failed to wire fleet: {err}"))?;

    let scheduler = Arc::clone(&fleet.scheduler);
    let tick_interval = settings.scheduler.tick_interval();
    let run_handle = tokio::spawn(async move { scheduler.run(tick_interval).await });
    let abort_handle = run_handle.abort_handle();

    tokio::select! {
        result = run_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "scheduler loop exited with an error");
                    anyhow::bail!(err);
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    error!(error = %err, "scheduler task panicked");
                    anyhow::bail!(err);
                }
            }
        }
        () = shutdown_signal() => {
            warn!("shutdown signal received, stopping");
            abort_handle.abort();
        }
    }

    info!("chomp stopped");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM, per §6's clean-shutdown exit code
/// 0 guarantee.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
