//! Worker error handling

use thiserror::Error;

use core_kernel::PortError;
use domain_intake::{IntakeError, WatermarkError};
use domain_registry::RegistryError;
use domain_sync::SyncError;
use infra_db::DatabaseError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Invalid input: {0}")]
    Input(String),
}

impl WorkerError {
    /// Whether the next poll may succeed without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Port(e) => e.is_transient(),
            WorkerError::Database(e) => e.is_connection_error(),
            WorkerError::Intake(e) => e.is_transient(),
            WorkerError::Watermark(WatermarkError::Port(e)) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WorkerError::from(PortError::connection("reset by peer")).is_transient());
        assert!(WorkerError::from(DatabaseError::PoolExhausted).is_transient());
        assert!(!WorkerError::Input("bad json".to_string()).is_transient());
    }
}
