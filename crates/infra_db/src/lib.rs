//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the claims intake pipeline, built on SQLx.
//!
//! # Layout
//!
//! - `repositories`: SQL over plain row types, one repository per table group
//! - `adapters`: implementations of the domain ports (`ChannelPort`,
//!   `ItemTypePort`, `StagingPort`, `WatermarkPort`, `UploadPort`) that
//!   translate rows into domain types
//! - `pool`: connection pool configuration and embedded migrations
//!
//! # Concurrency
//!
//! Identifier blocks are reserved with one `UPDATE ... RETURNING` on a
//! per-kind counter, so parallel batches never receive overlapping keys.
//! Status changes on staged rows and upload records are conditional updates
//! that report whether they applied.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig};
//! use infra_db::adapters::PostgresIntakeAdapter;
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/claims_intake")).await?;
//! run_migrations(&pool).await?;
//! let intake = PostgresIntakeAdapter::new(pool.clone());
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{DatabasePool, create_pool, create_pool_from_url, run_migrations, DatabaseConfig};
pub use error::DatabaseError;
pub use adapters::{PostgresIntakeAdapter, PostgresRegistryAdapter, PostgresUploadAdapter};
