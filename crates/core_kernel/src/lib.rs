//! Core Kernel - Foundational types for the claims intake pipeline
//!
//! This crate provides the building blocks shared by every pipeline stage:
//! - Strongly-typed monotonic identifiers for staged and tracked entities
//! - Block-reserving identifier allocation
//! - Port error types and health checking for adapters

pub mod identifiers;
pub mod allocator;
pub mod ports;
pub mod error;

pub use identifiers::{
    ChannelId, ItemTypeId, StagedClaimId, ServiceLineId, WatermarkId, UploadId,
    ExternalClaimId, BatchRunId, IdParseError,
};
pub use allocator::{IdAllocator, AtomicIdAllocator, IdBlock};
pub use ports::{
    PortError, DomainPort, AdapterHealth, HealthCheckResult, HealthCheckable,
};
pub use error::CoreError;
