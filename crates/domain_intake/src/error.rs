//! Error types for the intake domain

use thiserror::Error;

use core_kernel::{ChannelId, CoreError, PortError, StagedClaimId, ExternalClaimId};
use domain_registry::RegistryError;

use crate::watermark::EntityKind;

/// Errors raised by batch watermark bookkeeping
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// The committed range does not match the identifiers the batch assigned
    #[error("Range {first}..={last} does not match the {kind} identifiers assigned by the batch ({assigned})")]
    RangeMismatch {
        kind: EntityKind,
        first: i64,
        last: i64,
        assigned: String,
    },

    /// Not every identifier in the range is durably staged
    #[error("Range {first}..={last} of {kind} is incomplete: {found} of {expected} rows staged")]
    IncompleteRange {
        kind: EntityKind,
        first: i64,
        last: i64,
        expected: u64,
        found: u64,
    },

    /// The batch was already committed or aborted
    #[error("Batch for {kind} is already closed")]
    BatchClosed { kind: EntityKind },

    #[error("Invalid batch capacity: {0}")]
    InvalidCapacity(u64),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Port(#[from] PortError),
}

/// Errors raised while staging, validating, or promoting claims
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Missing or malformed envelope fields; nothing was staged
    #[error("Invalid claim envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Channel {0} is inactive")]
    InactiveChannel(ChannelId),

    /// The `(channel, external claim id)` pair is already staged
    #[error("Claim {external_claim_id} from {channel_id} is already staged as {existing}")]
    DuplicateExternalClaim {
        channel_id: ChannelId,
        external_claim_id: ExternalClaimId,
        existing: StagedClaimId,
    },

    /// The batch used up its reserved identifier block
    #[error("Batch has no {kind} identifiers left (needed {needed}, {remaining} remaining)")]
    BatchCapacityExhausted {
        kind: EntityKind,
        needed: u64,
        remaining: u64,
    },

    /// A storage failure left the batch unusable; it must be aborted
    #[error("Batch is poisoned by an earlier failure: {0}")]
    BatchPoisoned(String),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl IntakeError {
    /// Returns true for outcomes that reject a single envelope but leave the
    /// batch usable
    pub fn is_row_scoped(&self) -> bool {
        matches!(
            self,
            IntakeError::InvalidEnvelope(_)
                | IntakeError::UnknownChannel(_)
                | IntakeError::InactiveChannel(_)
                | IntakeError::DuplicateExternalClaim { .. }
                | IntakeError::BatchCapacityExhausted { .. }
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IntakeError::DuplicateExternalClaim { .. })
    }

    /// Returns true if retrying the batch may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IntakeError::Port(e) | IntakeError::Watermark(WatermarkError::Port(e)) => e.is_transient(),
            IntakeError::Registry(RegistryError::Port(e)) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for IntakeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        IntakeError::InvalidEnvelope(errors.to_string())
    }
}
