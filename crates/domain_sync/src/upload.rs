//! Upload records and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use core_kernel::{ChannelId, ItemTypeId, UploadId};

use crate::error::SyncError;

/// Delivery state of a propagated entity
///
/// Ordered: a record's state never compares lower than before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    NotSent,
    Sent,
    Received,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::NotSent => "NOT_SENT",
            UploadState::Sent => "SENT",
            UploadState::Received => "RECEIVED",
        }
    }

    /// Numeric code used by older external consumers
    pub fn legacy_code(&self) -> i16 {
        match self {
            UploadState::NotSent => 0,
            UploadState::Sent => 1,
            UploadState::Received => 3,
        }
    }

    pub fn from_legacy_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(UploadState::NotSent),
            1 => Some(UploadState::Sent),
            3 => Some(UploadState::Received),
            _ => None,
        }
    }

    /// Plans the move to `target`
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidTransition` unless the move is strictly forward
    pub fn plan(self, upload_id: UploadId, target: UploadState) -> Result<Transition, SyncError> {
        match (self, target) {
            (UploadState::NotSent, UploadState::Sent) | (UploadState::Sent, UploadState::Received) => {
                Ok(Transition { from: self, to: target, skipped_sent: false })
            }
            (UploadState::NotSent, UploadState::Received) => Ok(Transition {
                from: self,
                to: target,
                skipped_sent: true,
            }),
            _ => Err(SyncError::InvalidTransition {
                upload_id,
                from: self,
                to: target,
            }),
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_SENT" => Ok(UploadState::NotSent),
            "SENT" => Ok(UploadState::Sent),
            "RECEIVED" => Ok(UploadState::Received),
            other => Err(format!("unknown upload state '{}'", other)),
        }
    }
}

/// A planned forward move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: UploadState,
    pub to: UploadState,
    /// `NotSent -> Received` passes through `Sent` implicitly
    pub skipped_sent: bool,
}

impl Transition {
    /// The stored change for this transition, observed at `at`
    pub fn change(&self, at: DateTime<Utc>, status: Option<String>) -> StateChange {
        StateChange {
            to: self.to,
            sent_at: (self.from == UploadState::NotSent).then_some(at),
            received_at: (self.to == UploadState::Received).then_some(at),
            skipped_sent: self.skipped_sent,
            status,
        }
    }
}

/// Column updates applied by a compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub to: UploadState,
    /// Set when leaving `NotSent`; left untouched otherwise
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub skipped_sent: bool,
    pub status: Option<String>,
}

/// Delivery record for one entity propagated to one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: UploadId,
    /// Key of the propagated entity in its own relation
    pub item_id: i64,
    pub item_code: String,
    pub item_type: ItemTypeId,
    pub channel_id: ChannelId,
    pub state: UploadState,
    pub created_at: DateTime<Utc>,
    /// Last detail reported by the external system
    pub status: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    /// Received was acknowledged without a prior Sent
    pub skipped_sent: bool,
}

impl UploadRecord {
    /// Applies a change in memory, mirroring the stored update
    pub fn apply(&mut self, change: &StateChange) {
        self.state = change.to;
        if change.sent_at.is_some() {
            self.sent_at = change.sent_at;
        }
        if change.received_at.is_some() {
            self.received_at = change.received_at;
        }
        self.skipped_sent |= change.skipped_sent;
        if change.status.is_some() {
            self.status = change.status.clone();
        }
    }
}

/// Request to track a new propagation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewUpload {
    #[validate(range(min = 1))]
    pub item_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub item_code: String,
    pub item_type: ItemTypeId,
    pub channel_id: ChannelId,
}

impl NewUpload {
    pub fn new(item_id: i64, item_code: impl Into<String>, item_type: ItemTypeId, channel_id: ChannelId) -> Self {
        Self {
            item_id,
            item_code: item_code.into().trim().to_string(),
            item_type,
            channel_id,
        }
    }
}

/// What the external system acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    Sent,
    Received,
}

impl AckKind {
    pub fn target(&self) -> UploadState {
        match self {
            AckKind::Sent => UploadState::Sent,
            AckKind::Received => UploadState::Received,
        }
    }
}

/// Acknowledgment received from an external system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub upload_id: UploadId,
    pub kind: AckKind,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Result of applying an acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The record moved forward
    Applied { record: UploadRecord, from: UploadState },
    /// The acknowledgment would not move the record forward; nothing changed
    Rejected { record: UploadRecord, requested: UploadState },
    /// No record has this id; nothing was created
    UnknownTarget(UploadId),
}

impl AckOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AckOutcome::Applied { .. })
    }

    /// The record after the acknowledgment, when it exists
    pub fn record(&self) -> Option<&UploadRecord> {
        match self {
            AckOutcome::Applied { record, .. } | AckOutcome::Rejected { record, .. } => Some(record),
            AckOutcome::UnknownTarget(_) => None,
        }
    }
}
