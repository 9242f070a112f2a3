//! Runtime configuration (ambient stack, §10).
//!
//! Layered the same way as `ghostnet_indexer::config::settings::Settings`:
//! built-in defaults, then an optional `config/default.toml`, then an
//! optional `config/{environment}.toml`, then `CHOMP__`-prefixed
//! environment variables, each layer overriding the last. The section
//! names trade the indexer's `rpc`/`database`/`iggy`/`api` domains for
//! the ones this runtime's §6 command-line surface actually exposes:
//! claim-lock mode, cache sizing, per-chain RPC endpoints, scheduler
//! concurrency, storage backend selection, and this instance's identity.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Distributed claim lock configuration.
    pub claim: ClaimSettings,
    /// In-process cache store configuration.
    pub cache: CacheSettings,
    /// Per-chain RPC endpoint configuration.
    #[serde(default)]
    pub rpc: RpcSettings,
    /// Scheduler concurrency and retry configuration.
    pub scheduler: SchedulerSettings,
    /// Time-series storage backend selection.
    pub storage: StorageSettings,
    /// This fleet instance's identity.
    pub instance: InstanceSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Layers are applied in this order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. `config/default.toml` (if present)
    /// 3. `config/{environment}.toml` (if present)
    /// 4. Environment variables with the `CHOMP__` prefix
    ///
    /// # Errors
    /// Returns [`ConfigError`] if configuration is invalid or cannot be
    /// loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("claim.stand_alone", false)?
            .set_default("cache.max_capacity", 100_000)?
            .set_default("scheduler.worker_pool_size", 32)?
            .set_default("scheduler.ingestion_timeout_secs", 30)?
            .set_default("scheduler.max_retries", 3)?
            .set_default("scheduler.tick_interval_ms", 1000)?
            .set_default("storage.tsdb_adapter", "memory")?
            .set_default("instance.proc_id", "chomp-0")?
            .set_default("instance.threaded", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("CHOMP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path, bypassing the layered
    /// default/environment/env-var resolution. Mainly useful for tests
    /// and one-off local runs.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate cross-field invariants not expressible in the type
    /// system alone.
    ///
    /// # Errors
    /// Returns the accumulated list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cache.max_capacity == 0 {
            errors.push("cache.max_capacity must be non-zero".to_string());
        }
        if self.scheduler.worker_pool_size == 0 {
            errors.push("scheduler.worker_pool_size must be non-zero".to_string());
        }
        if self.scheduler.ingestion_timeout_secs == 0 {
            errors.push("scheduler.ingestion_timeout_secs must be non-zero".to_string());
        }
        if self.instance.proc_id.trim().is_empty() {
            errors.push("instance.proc_id must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Distributed claim lock configuration (component B).
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimSettings {
    /// `true` for single-instance deployments that should proceed even
    /// if the claim-lock cache backend is unreachable.
    pub stand_alone: bool,
}

/// In-process cache store configuration (component D).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of entries the in-process cache holds.
    pub max_capacity: u64,
}

/// Per-chain RPC endpoint configuration (component C).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcSettings {
    /// Chain id to ordered endpoint URL list.
    #[serde(default)]
    pub chains: std::collections::HashMap<String, Vec<String>>,
}

/// Scheduler concurrency and retry configuration (component F).
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Number of concurrently in-flight ingester ticks, bounding the
    /// worker pool semaphore.
    pub worker_pool_size: usize,
    /// Per-tick ingestion timeout, in seconds.
    pub ingestion_timeout_secs: u64,
    /// Maximum retry attempts for a transient tick failure.
    pub max_retries: u32,
    /// How often the Scheduler's main loop polls for due ingesters, in
    /// milliseconds.
    pub tick_interval_ms: u64,
}

impl SchedulerSettings {
    /// Get the ingestion timeout as a [`Duration`].
    #[must_use]
    pub const fn ingestion_timeout(&self) -> Duration {
        Duration::from_secs(self.ingestion_timeout_secs)
    }

    /// Get the main-loop tick interval as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Time-series storage backend selection (component I).
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Which `TimeSeriesSink` adapter to wire up. The adapter
    /// implementations themselves are out of scope; this just names
    /// which one a deployment intends.
    pub tsdb_adapter: String,
}

/// This fleet instance's identity (§6's `--proc_id`/`--threaded`).
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSettings {
    /// Stable identifier for this process, used as the claim-lock
    /// owner token.
    pub proc_id: String,
    /// Whether this instance runs ingesters on a multi-threaded tokio
    /// runtime (`true`) or a single-threaded one (`false`).
    pub threaded: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (`pretty`, `json`).
    pub format: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings {
            claim: ClaimSettings { stand_alone: false },
            cache: CacheSettings {
                max_capacity: 100_000,
            },
            rpc: RpcSettings::default(),
            scheduler: SchedulerSettings {
                worker_pool_size: 32,
                ingestion_timeout_secs: 30,
                max_retries: 3,
                tick_interval_ms: 1000,
            },
            storage: StorageSettings {
                tsdb_adapter: "memory".to_string(),
            },
            instance: InstanceSettings {
                proc_id: "chomp-0".to_string(),
                threaded: true,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn scheduler_durations() {
        let scheduler = SchedulerSettings {
            worker_pool_size: 16,
            ingestion_timeout_secs: 10,
            max_retries: 3,
            tick_interval_ms: 500,
        };
        assert_eq!(scheduler.ingestion_timeout(), Duration::from_secs(10));
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn validation_passes_on_defaults() {
        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn validation_catches_zero_worker_pool() {
        let mut settings = valid_settings();
        settings.scheduler.worker_pool_size = 0;
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("worker_pool_size")));
    }

    #[test]
    fn validation_catches_empty_proc_id() {
        let mut settings = valid_settings();
        settings.instance.proc_id = String::new();
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("proc_id")));
    }

    #[test]
    fn load_applies_builtin_defaults_with_no_files_or_env() {
        // CONFIG_DIR points somewhere with no default/production files,
        // so only the built-in set_default calls and (absent) env vars
        // apply.
        // SAFETY: test-only process-wide env mutation, no concurrent
        // access to CONFIG_DIR from other tests in this crate.
        unsafe {
            std::env::set_var("CONFIG_DIR", "/nonexistent-chomp-config-dir");
        }
        let settings = Settings::load("test").unwrap();
        assert!(!settings.claim.stand_alone);
        assert_eq!(settings.cache.max_capacity, 100_000);
        assert_eq!(settings.scheduler.worker_pool_size, 32);
        assert_eq!(settings.instance.proc_id, "chomp-0");
        unsafe {
            std::env::remove_var("CONFIG_DIR");
        }
    }
}
