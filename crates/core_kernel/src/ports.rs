//! Ports and Adapters Infrastructure
//!
//! Each pipeline stage defines its own port traits (channel lookup, staging
//! storage, watermark storage, upload state storage). Adapters implement them
//! either against PostgreSQL (`infra_db`) or in memory for tests.
//!
//! ```text
//!   IntakeService / Validator / UploadTracker
//!                    │
//!                    ▼
//!     ChannelPort, StagingPort, WatermarkPort, UploadPort
//!            ▲                          ▲
//!   ┌────────┴─────────┐      ┌─────────┴────────┐
//!   │ Postgres adapter │      │   Mock adapter   │
//!   └──────────────────┘      └──────────────────┘
//! ```

use std::fmt;
use std::time::Instant;
use thiserror::Error;
use serde::{Deserialize, Serialize};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by any port implementation
///
/// Services decide between skipping a row, retrying later and aborting a run
/// from the variant alone, so adapters must map their native errors onto it
/// faithfully.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The store refused the values themselves
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Uniqueness violation, stale compare-and-set or closed reservation
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The store could not be reached; retrying may succeed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it as the source
    pub fn internal_from(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        PortError::Internal {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PortError::Conflict { .. })
    }
}

/// Marker for port traits; ports are shared across tasks
pub trait DomainPort: Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Unhealthy,
}

/// Outcome of probing one adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub adapter_id: String,
    pub status: AdapterHealth,
    pub latency_ms: u64,
    /// Failure detail when unhealthy
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthCheckResult {
    /// Healthy result for adapters with nothing to probe
    pub fn healthy(adapter_id: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: None,
            checked_at: chrono::Utc::now(),
        }
    }

    /// Result of a probe that started at `started`
    pub fn from_probe<E: fmt::Display>(
        adapter_id: impl Into<String>,
        started: Instant,
        outcome: Result<(), E>,
    ) -> Self {
        let (status, message) = match outcome {
            Ok(()) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
        };
        Self {
            adapter_id: adapter_id.into(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            message,
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == AdapterHealth::Healthy
    }
}

#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}
