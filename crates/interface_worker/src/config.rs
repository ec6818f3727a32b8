//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use domain_intake::{IntakeConfig, WorkerIdentity};
use infra_db::DatabaseConfig;

/// Worker configuration
///
/// Every field has a default; any of them can be overridden with an
/// `INTAKE_`-prefixed environment variable, e.g. `INTAKE_POLL_INTERVAL_MS=500`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Database URL
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Pause between validation passes
    pub poll_interval_ms: u64,
    /// Consumer name under which range progress is recorded
    pub consumer: String,
    /// Lease holder name; unique per running worker
    pub worker_name: String,
    /// Seconds a leased range stays reserved to this worker
    pub lease_secs: i64,
    pub claim_capacity: u64,
    pub service_capacity: u64,
    /// Open reservations older than this are released as abandoned
    pub stale_after_secs: i64,
    /// Log level
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let intake = IntakeConfig::default();
        Self {
            database_url: "postgres://localhost/claims_intake".to_string(),
            max_connections: 10,
            min_connections: 2,
            poll_interval_ms: 2_000,
            consumer: "promotion".to_string(),
            worker_name: "worker-1".to_string(),
            lease_secs: 300,
            claim_capacity: intake.claim_capacity,
            service_capacity: intake.service_capacity,
            stale_after_secs: 3_600,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from `INTAKE_*` environment variables
    ///
    /// `DATABASE_URL` is honoured when `INTAKE_DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut loaded: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("INTAKE").try_parsing(true))
            .build()?
            .try_deserialize()?;
        if std::env::var("INTAKE_DATABASE_URL").is_err() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                loaded.database_url = url;
            }
        }
        Ok(loaded)
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.database_url)
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
    }

    pub fn intake(&self) -> IntakeConfig {
        IntakeConfig {
            claim_capacity: self.claim_capacity,
            service_capacity: self.service_capacity,
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        WorkerIdentity::new(&self.consumer, &self.worker_name)
            .with_lease(chrono::Duration::seconds(self.lease_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_intake_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.intake(), IntakeConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.identity().lease, chrono::Duration::minutes(5));
        assert_eq!(config.database().max_connections, 10);
    }

    #[test]
    fn test_partial_source_keeps_defaults() {
        let config: WorkerConfig = config::Config::builder()
            .set_override("consumer", "billing")
            .unwrap()
            .set_override("poll_interval_ms", 250)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.consumer, "billing");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.claim_capacity, 500);
        assert!(!config.json_logs);
    }
}
