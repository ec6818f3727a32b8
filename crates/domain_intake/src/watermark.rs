//! Batch watermarks
//!
//! A batch reserves a contiguous identifier block for one entity kind and
//! assigns identifiers from it in order as rows are staged. Committing the
//! batch records a [`BatchWatermark`] covering exactly the identifiers it
//! assigned, after checking that every one of them is durably staged.
//!
//! Consumers never read rows directly by identifier. They ask for the
//! committed ranges they have not consumed yet. Ranges are returned in
//! identifier order and stop before the lowest block that is still open, so a
//! consumer can never observe a later range while an earlier one may still
//! commit. A batch that fails never commits, leaving a gap that consumers
//! skip.
//!
//! Progress is tracked per consumer and per range, which lets several workers
//! share a consumer name by leasing ranges, and lets a restarted worker resume
//! with the ranges it never completed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use core_kernel::{BatchRunId, IdBlock, PortError, WatermarkId};

use crate::error::WatermarkError;
use crate::ports::WatermarkPort;

/// Staged entity kinds that are tracked by watermarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    StagedClaim,
    StagedClaimService,
}

impl EntityKind {
    /// Kinds in the order consumers should drain them; parents first
    pub const ALL: [EntityKind; 2] = [EntityKind::StagedClaim, EntityKind::StagedClaimService];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::StagedClaim => "staged_claim",
            EntityKind::StagedClaimService => "staged_claim_service",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged_claim" => Ok(EntityKind::StagedClaim),
            "staged_claim_service" => Ok(EntityKind::StagedClaimService),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// An identifier block held open by an uncommitted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub run_id: BatchRunId,
    pub kind: EntityKind,
    pub block: IdBlock,
    pub reserved_at: DateTime<Utc>,
}

/// Committed range of identifiers produced by one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWatermark {
    pub id: WatermarkId,
    pub run_id: BatchRunId,
    pub kind: EntityKind,
    pub first_id: i64,
    pub last_id: i64,
    pub captured_at: DateTime<Utc>,
}

impl BatchWatermark {
    pub fn contains(&self, id: i64) -> bool {
        id >= self.first_id && id <= self.last_id
    }

    pub fn len(&self) -> u64 {
        (self.last_id - self.first_id + 1) as u64
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A range to be recorded as a watermark, closing its reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCommit {
    pub reservation: Reservation,
    pub first_id: i64,
    pub last_id: i64,
}

impl RangeCommit {
    pub fn len(&self) -> u64 {
        (self.last_id - self.first_id + 1) as u64
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleStatus {
    Open,
    Committed,
    Aborted,
}

#[derive(Debug)]
pub(crate) struct HandleState {
    next: i64,
    status: HandleStatus,
}

/// An open batch for one entity kind
#[derive(Debug)]
pub struct BatchHandle {
    reservation: Reservation,
    state: Mutex<HandleState>,
}

impl BatchHandle {
    fn new(reservation: Reservation) -> Self {
        let next = reservation.block.first();
        Self {
            reservation,
            state: Mutex::new(HandleState {
                next,
                status: HandleStatus::Open,
            }),
        }
    }

    pub fn run_id(&self) -> BatchRunId {
        self.reservation.run_id
    }

    pub fn kind(&self) -> EntityKind {
        self.reservation.kind
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// The identifiers assigned so far, if any
    pub async fn assigned_range(&self) -> Option<(i64, i64)> {
        let state = self.state.lock().await;
        assigned(&self.reservation.block, &state)
    }

    /// Identifiers still available in the reserved block
    pub async fn remaining(&self) -> u64 {
        let state = self.state.lock().await;
        remaining(&self.reservation.block, &state)
    }

    /// Locks the handle for assignment
    ///
    /// The cursor must be held across the insert that uses its identifiers,
    /// so identifiers are only consumed by rows that were actually written.
    pub(crate) async fn cursor(&self) -> Result<IdCursor<'_>, WatermarkError> {
        let state = self.state.lock().await;
        if state.status != HandleStatus::Open {
            return Err(WatermarkError::BatchClosed { kind: self.kind() });
        }
        Ok(IdCursor {
            block: self.reservation.block,
            state,
        })
    }
}

fn assigned(block: &IdBlock, state: &HandleState) -> Option<(i64, i64)> {
    (state.next > block.first()).then(|| (block.first(), state.next - 1))
}

fn remaining(block: &IdBlock, state: &HandleState) -> u64 {
    (block.last() - state.next + 1).max(0) as u64
}

/// Exclusive access to a batch's next identifiers
pub(crate) struct IdCursor<'a> {
    block: IdBlock,
    state: MutexGuard<'a, HandleState>,
}

impl IdCursor<'_> {
    pub(crate) fn remaining(&self) -> u64 {
        remaining(&self.block, &self.state)
    }

    /// The next `count` identifiers, without consuming them
    pub(crate) fn peek(&self, count: u64) -> Option<IdBlock> {
        if count == 0 || count > self.remaining() {
            return None;
        }
        IdBlock::new(self.state.next, self.state.next + count as i64 - 1).ok()
    }

    /// Consumes `count` identifiers after the rows using them were written
    pub(crate) fn advance(&mut self, count: u64) {
        self.state.next += count as i64;
    }
}

/// Opens, commits, and consumes batch watermarks
#[derive(Clone)]
pub struct WatermarkTracker {
    port: Arc<dyn WatermarkPort>,
}

impl WatermarkTracker {
    pub fn new(port: Arc<dyn WatermarkPort>) -> Self {
        Self { port }
    }

    /// Opens a batch under a fresh run id
    pub async fn begin_batch(
        &self,
        kind: EntityKind,
        capacity: u64,
    ) -> Result<BatchHandle, WatermarkError> {
        self.begin_batch_for_run(BatchRunId::new(), kind, capacity).await
    }

    /// Opens a batch, reserving `capacity` identifiers
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn begin_batch_for_run(
        &self,
        run_id: BatchRunId,
        kind: EntityKind,
        capacity: u64,
    ) -> Result<BatchHandle, WatermarkError> {
        if capacity == 0 {
            return Err(WatermarkError::InvalidCapacity(capacity));
        }
        let reservation = self.port.reserve(run_id, kind, capacity).await?;
        debug!(
            kind = %kind,
            first = reservation.block.first(),
            last = reservation.block.last(),
            "Reserved identifier block"
        );
        Ok(BatchHandle::new(reservation))
    }

    /// Commits one batch's range
    ///
    /// `first..=last` must equal the identifiers the batch assigned, and
    /// every one of them must be staged.
    pub async fn commit_batch(
        &self,
        handle: &BatchHandle,
        first: i64,
        last: i64,
    ) -> Result<BatchWatermark, WatermarkError> {
        let mut state = handle.state.lock().await;
        if state.status != HandleStatus::Open {
            return Err(WatermarkError::BatchClosed { kind: handle.kind() });
        }
        let block = handle.reservation.block;
        if assigned(&block, &state) != Some((first, last)) {
            return Err(mismatch(handle.kind(), first, last, assigned(&block, &state)));
        }
        let commit = RangeCommit {
            reservation: handle.reservation.clone(),
            first_id: first,
            last_id: last,
        };
        self.verify_complete(&commit).await?;
        let mut watermarks = self.port.commit(vec![commit]).await?;
        state.status = HandleStatus::Committed;
        let watermark = watermarks
            .pop()
            .ok_or_else(|| PortError::internal("commit returned no watermark"))?;
        info!(
            watermark_id = %watermark.id,
            kind = %watermark.kind,
            first = watermark.first_id,
            last = watermark.last_id,
            "Committed batch watermark"
        );
        Ok(watermark)
    }

    /// Commits the assigned ranges of several batches as one unit
    ///
    /// Batches that assigned nothing are released instead, since an empty
    /// range cannot be recorded.
    pub async fn commit_assigned(
        &self,
        handles: &[&BatchHandle],
    ) -> Result<Vec<BatchWatermark>, WatermarkError> {
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            let guard = handle.state.lock().await;
            if guard.status != HandleStatus::Open {
                return Err(WatermarkError::BatchClosed { kind: handle.kind() });
            }
            guards.push(guard);
        }

        let mut commits = Vec::new();
        let mut empty = Vec::new();
        for (handle, state) in handles.iter().zip(guards.iter()) {
            match assigned(&handle.reservation.block, state) {
                Some((first_id, last_id)) => commits.push(RangeCommit {
                    reservation: handle.reservation.clone(),
                    first_id,
                    last_id,
                }),
                None => empty.push(&handle.reservation),
            }
        }

        for commit in &commits {
            self.verify_complete(commit).await?;
        }
        let watermarks = if commits.is_empty() {
            Vec::new()
        } else {
            self.port.commit(commits).await?
        };
        for reservation in empty {
            self.port.release(reservation).await?;
        }
        for guard in guards.iter_mut() {
            guard.status = HandleStatus::Committed;
        }

        for watermark in &watermarks {
            info!(
                watermark_id = %watermark.id,
                run_id = %watermark.run_id,
                kind = %watermark.kind,
                first = watermark.first_id,
                last = watermark.last_id,
                "Committed batch watermark"
            );
        }
        Ok(watermarks)
    }

    /// Abandons a batch; its staged rows are discarded and its range is
    /// never committed
    ///
    /// Returns the number of discarded rows. Aborting twice is a no-op.
    pub async fn abort_batch(&self, handle: &BatchHandle) -> Result<u64, WatermarkError> {
        let mut state = handle.state.lock().await;
        match state.status {
            HandleStatus::Aborted => return Ok(0),
            HandleStatus::Committed => {
                return Err(WatermarkError::BatchClosed { kind: handle.kind() })
            }
            HandleStatus::Open => {}
        }
        let discarded = self.port.release(&handle.reservation).await?;
        state.status = HandleStatus::Aborted;
        warn!(
            run_id = %handle.run_id(),
            kind = %handle.kind(),
            discarded,
            "Aborted batch"
        );
        Ok(discarded)
    }

    /// Committed ranges the consumer has not completed, in identifier order
    pub async fn next_unprocessed_ranges(
        &self,
        kind: EntityKind,
        consumer: &str,
    ) -> Result<Vec<BatchWatermark>, WatermarkError> {
        Ok(self.port.pending_ranges(kind, consumer).await?)
    }

    /// Leases the first unprocessed range not currently leased by another worker
    #[instrument(skip(self, lease), fields(kind = %kind))]
    pub async fn claim_next_range(
        &self,
        kind: EntityKind,
        consumer: &str,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<BatchWatermark>, WatermarkError> {
        for range in self.port.pending_ranges(kind, consumer).await? {
            let lease_until = Utc::now() + lease;
            if self.port.try_lease(range.id, consumer, worker, lease_until).await? {
                debug!(watermark_id = %range.id, first = range.first_id, last = range.last_id, "Leased range");
                return Ok(Some(range));
            }
        }
        Ok(None)
    }

    /// Leases a specific range for a worker; `false` if it is taken or done
    pub async fn try_claim(
        &self,
        range: &BatchWatermark,
        consumer: &str,
        worker: &str,
        lease: Duration,
    ) -> Result<bool, WatermarkError> {
        let lease_until = Utc::now() + lease;
        Ok(self.port.try_lease(range.id, consumer, worker, lease_until).await?)
    }

    /// Marks a range as fully processed for the consumer
    pub async fn complete_range(
        &self,
        range: &BatchWatermark,
        consumer: &str,
    ) -> Result<(), WatermarkError> {
        self.port.mark_consumed(range.id, consumer).await?;
        debug!(watermark_id = %range.id, consumer, "Completed range");
        Ok(())
    }

    /// Releases reservations left open longer than `older_than`
    ///
    /// Used after a crash so a dead batch cannot hold the visibility horizon
    /// back forever.
    pub async fn abandon_stale(&self, older_than: Duration) -> Result<Vec<Reservation>, WatermarkError> {
        let cutoff = Utc::now() - older_than;
        let released = self.port.release_stale(cutoff).await?;
        for reservation in &released {
            warn!(
                run_id = %reservation.run_id,
                kind = %reservation.kind,
                first = reservation.block.first(),
                last = reservation.block.last(),
                reserved_at = %reservation.reserved_at,
                "Abandoned stale reservation"
            );
        }
        Ok(released)
    }

    /// Whether the identifier lies in a committed range
    pub async fn is_committed(&self, kind: EntityKind, id: i64) -> Result<bool, WatermarkError> {
        Ok(self.port.find_covering(kind, id).await?.is_some())
    }

    /// The range a run committed for `kind`, if it committed one
    pub async fn run_range(
        &self,
        run_id: BatchRunId,
        kind: EntityKind,
    ) -> Result<Option<BatchWatermark>, WatermarkError> {
        Ok(self.port.find_for_run(run_id, kind).await?)
    }

    async fn verify_complete(&self, commit: &RangeCommit) -> Result<(), WatermarkError> {
        let kind = commit.reservation.kind;
        let found = self
            .port
            .count_staged(kind, commit.first_id, commit.last_id)
            .await?;
        if found != commit.len() {
            return Err(WatermarkError::IncompleteRange {
                kind,
                first: commit.first_id,
                last: commit.last_id,
                expected: commit.len(),
                found,
            });
        }
        Ok(())
    }
}

fn mismatch(kind: EntityKind, first: i64, last: i64, assigned: Option<(i64, i64)>) -> WatermarkError {
    WatermarkError::RangeMismatch {
        kind,
        first,
        last,
        assigned: match assigned {
            Some((a, b)) => format!("{}..={}", a, b),
            None => "none".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(first: i64, last: i64) -> BatchHandle {
        BatchHandle::new(Reservation {
            run_id: BatchRunId::new(),
            kind: EntityKind::StagedClaim,
            block: IdBlock::new(first, last).unwrap(),
            reserved_at: Utc::now(),
        })
    }

    #[test]
    fn test_entity_kind_strings() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[tokio::test]
    async fn test_cursor_assigns_in_order() {
        let handle = handle(10, 14);
        assert_eq!(handle.assigned_range().await, None);

        {
            let mut cursor = handle.cursor().await.unwrap();
            let ids = cursor.peek(2).unwrap();
            assert_eq!((ids.first(), ids.last()), (10, 11));
            cursor.advance(2);
        }
        {
            let mut cursor = handle.cursor().await.unwrap();
            assert_eq!(cursor.peek(1).unwrap().first(), 12);
            cursor.advance(1);
        }

        assert_eq!(handle.assigned_range().await, Some((10, 12)));
        assert_eq!(handle.remaining().await, 2);
    }

    #[tokio::test]
    async fn test_cursor_respects_capacity() {
        let handle = handle(1, 3);
        let cursor = handle.cursor().await.unwrap();
        assert!(cursor.peek(4).is_none());
        assert!(cursor.peek(0).is_none());
        assert!(cursor.peek(3).is_some());
    }

    #[test]
    fn test_watermark_contains() {
        let watermark = BatchWatermark {
            id: WatermarkId::new(1),
            run_id: BatchRunId::new(),
            kind: EntityKind::StagedClaimService,
            first_id: 5,
            last_id: 9,
            captured_at: Utc::now(),
        };
        assert!(watermark.contains(5));
        assert!(watermark.contains(9));
        assert!(!watermark.contains(10));
        assert_eq!(watermark.len(), 5);
    }
}
