//! Claim Intake Domain
//!
//! This crate stages claim submissions from external channels and prepares
//! them for promotion into production records.
//!
//! # Flow
//!
//! ```text
//! ClaimEnvelope -> IntakeService::ingest -> staged rows (PENDING)
//!              -> IntakeService::commit -> BatchWatermark per entity kind
//!              -> ValidationWorker / Validator -> PROMOTED | QUARANTINED
//!              -> PromotionPort (external collaborator)
//! ```
//!
//! # Guarantees
//!
//! - `(channel, external claim id)` is staged at most once
//! - a claim and its service lines are written as one unit
//! - a batch's identifiers are contiguous and disjoint from other batches, and
//!   its watermark only commits once every identifier in it is durably staged
//! - consumers see committed ranges in identifier order and resume from their
//!   own progress after a crash
//! - row-level validation problems quarantine the row, never the batch

pub mod claim;
pub mod envelope;
pub mod watermark;
pub mod intake;
pub mod validation;
pub mod promotion;
pub mod worker;
pub mod error;
pub mod ports;

pub use claim::{
    StagedClaim, StagedClaimService, StagingStatus, QuarantineReason, ClaimRef,
};
pub use envelope::{ClaimEnvelope, ServiceLineInput};
pub use watermark::{
    EntityKind, BatchWatermark, BatchHandle, Reservation, RangeCommit, WatermarkTracker,
};
pub use intake::{IntakeService, IntakeConfig, IntakeBatch, CommittedBatch};
pub use validation::{Validator, ValidationReport, QuarantinedRow, DeferredRow, RowRef};
pub use promotion::{PromotionPort, PromotedClaim};
pub use worker::{ValidationWorker, WorkerIdentity};
pub use error::{IntakeError, WatermarkError};
pub use ports::{StagingPort, WatermarkPort};
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::{MockStagingStore, RecordingPromotionPort};
