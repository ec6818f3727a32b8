//! Staged claim rows

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BatchRunId, ChannelId, ExternalClaimId, ServiceLineId, StagedClaimId};

/// Processing status of a staged row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagingStatus {
    /// Staged, awaiting validation
    Pending,
    /// Validated and handed to the promotion collaborator
    Promoted,
    /// Failed referential validation; kept for operator review
    Quarantined,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Pending => "PENDING",
            StagingStatus::Promoted => "PROMOTED",
            StagingStatus::Quarantined => "QUARANTINED",
        }
    }

    /// Whether the row has reached a terminal state
    pub fn is_processed(&self) -> bool {
        !matches!(self, StagingStatus::Pending)
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StagingStatus::Pending),
            "PROMOTED" => Ok(StagingStatus::Promoted),
            "QUARANTINED" => Ok(StagingStatus::Quarantined),
            other => Err(format!("unknown staging status '{}'", other)),
        }
    }
}

/// Why a staged row was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The claim's channel is not registered
    UnknownChannel,
    /// The claim's channel was deactivated before validation
    InactiveChannel,
    /// The service line's parent claim does not exist in a committed range
    OrphanedService,
    /// The service line's parent claim was itself quarantined
    ParentQuarantined,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::UnknownChannel => "unknown_channel",
            QuarantineReason::InactiveChannel => "inactive_channel",
            QuarantineReason::OrphanedService => "orphaned_service",
            QuarantineReason::ParentQuarantined => "parent_quarantined",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuarantineReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown_channel" => Ok(QuarantineReason::UnknownChannel),
            "inactive_channel" => Ok(QuarantineReason::InactiveChannel),
            "orphaned_service" => Ok(QuarantineReason::OrphanedService),
            "parent_quarantined" => Ok(QuarantineReason::ParentQuarantined),
            other => Err(format!("unknown quarantine reason '{}'", other)),
        }
    }
}

/// Typed reference from a service line to its parent claim
///
/// External claim ids are only unique per channel, so the channel is part of
/// the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRef {
    pub channel_id: ChannelId,
    pub external_claim_id: ExternalClaimId,
}

impl ClaimRef {
    pub fn new(channel_id: ChannelId, external_claim_id: impl Into<ExternalClaimId>) -> Self {
        Self {
            channel_id,
            external_claim_id: external_claim_id.into(),
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.external_claim_id)
    }
}

/// A claim envelope held in staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedClaim {
    pub id: StagedClaimId,
    /// Ingestion run that staged the row
    pub run_id: BatchRunId,
    pub external_claim_id: ExternalClaimId,
    pub channel_id: ChannelId,
    pub scheme_code: String,
    pub provider_code: String,
    pub member_number: String,
    pub benefit_id: String,
    pub amount: Decimal,
    pub invoice_date: NaiveDate,
    pub status: StagingStatus,
    pub quarantine_reason: Option<QuarantineReason>,
    /// Set once the row reaches a terminal status
    pub processed: bool,
    pub inserted_at: DateTime<Utc>,
}

impl StagedClaim {
    pub fn claim_ref(&self) -> ClaimRef {
        ClaimRef::new(self.channel_id, self.external_claim_id.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == StagingStatus::Pending
    }
}

/// A service line held in staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedClaimService {
    pub id: ServiceLineId,
    pub run_id: BatchRunId,
    /// Parent as declared by the source
    pub claim_ref: ClaimRef,
    /// Parent key once resolved; `None` while the parent is unknown
    pub parent_id: Option<StagedClaimId>,
    /// Position of the line within its envelope, starting at 1
    pub line_number: i32,
    pub service_code: String,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub diagnosis_code: Option<String>,
    /// Whether a downstream consumer has picked the line up
    pub picked: bool,
    pub status: StagingStatus,
    pub quarantine_reason: Option<QuarantineReason>,
    pub inserted_at: DateTime<Utc>,
}

impl StagedClaimService {
    pub fn is_pending(&self) -> bool {
        self.status == StagingStatus::Pending
    }
}
