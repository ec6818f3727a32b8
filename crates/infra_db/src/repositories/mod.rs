//! Repository implementations for the intake tables
//!
//! Repositories own the SQL. They read and write plain row structs and know
//! nothing about the domain types; the adapters in `crate::adapters` do that
//! translation.
//!
//! # Conventions
//!
//! - Runtime-checked queries (`sqlx::query_as`) with `FromRow` rows
//! - Multi-statement writes run in one transaction
//! - State changes are conditional updates (`WHERE status = ...`) so that
//!   concurrent workers cannot move a row twice

pub mod registry;
pub mod staging;
pub mod watermark;
pub mod upload;

pub use registry::{ChannelRow, ItemTypeRow, RegistryRepository};
pub use staging::{StagedClaimRow, StagedServiceRow, StagingRepository};
pub use watermark::{RangeCommitParams, ReservationRow, WatermarkRepository, WatermarkRow};
pub use upload::{NewUploadRow, StateUpdate, UploadRepository, UploadRow};
