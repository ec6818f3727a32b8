//! Domain Adapters
//!
//! PostgreSQL implementations of the domain ports. Each adapter wraps a
//! repository, converts rows into domain types and reports failures as
//! `PortError`.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infra_db::adapters::PostgresIntakeAdapter;
//! use domain_intake::{StagingPort, WatermarkPort};
//!
//! let adapter = Arc::new(PostgresIntakeAdapter::new(pool));
//! let staging: Arc<dyn StagingPort> = adapter.clone();
//! let watermarks: Arc<dyn WatermarkPort> = adapter;
//! ```

pub mod registry;
pub mod intake;
pub mod upload;

pub use registry::PostgresRegistryAdapter;
pub use intake::PostgresIntakeAdapter;
pub use upload::PostgresUploadAdapter;

use sqlx::PgPool;
use std::time::Instant;

use core_kernel::HealthCheckResult;

/// Runs `SELECT 1` and reports the adapter's health with its latency
pub(crate) async fn probe(pool: &PgPool, adapter_id: &str) -> HealthCheckResult {
    let started = Instant::now();
    let outcome = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
        .map_err(|e| format!("Database error: {}", e));
    HealthCheckResult::from_probe(adapter_id, started, outcome)
}
