//! Intake Domain Ports
//!
//! Storage interfaces for staged rows and batch watermarks. Both are
//! implemented over the same database in production, which is what allows a
//! watermark commit to check the rows it covers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    BatchRunId, DomainPort, HealthCheckable, PortError, ServiceLineId, StagedClaimId, WatermarkId,
};

use crate::claim::{ClaimRef, QuarantineReason, StagedClaim, StagedClaimService, StagingStatus};
use crate::watermark::{BatchWatermark, EntityKind, RangeCommit, Reservation};

/// Storage operations for staged claims and service lines
#[async_trait]
pub trait StagingPort: DomainPort + HealthCheckable {
    /// Inserts a claim and its service lines as one unit
    ///
    /// # Errors
    ///
    /// `PortError::Conflict` if the `(channel, external claim id)` pair or
    /// any key is already present; nothing is written in that case.
    async fn insert_claim(
        &self,
        claim: StagedClaim,
        services: Vec<StagedClaimService>,
    ) -> Result<(), PortError>;

    async fn get_claim(&self, id: StagedClaimId) -> Result<Option<StagedClaim>, PortError>;

    /// Looks a claim up by its channel-scoped external id
    async fn find_claim_by_ref(&self, claim_ref: &ClaimRef) -> Result<Option<StagedClaim>, PortError>;

    /// Claims with ids in `first..=last`, ordered by id
    async fn claims_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaim>, PortError>;

    /// Service lines with ids in `first..=last`, ordered by id
    async fn services_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaimService>, PortError>;

    /// Service lines resolved to the given parent, ordered by id
    async fn services_for_claim(&self, claim_id: StagedClaimId) -> Result<Vec<StagedClaimService>, PortError>;

    /// Records the resolved parent of a service line
    async fn link_service_parent(
        &self,
        service_id: ServiceLineId,
        parent_id: StagedClaimId,
    ) -> Result<(), PortError>;

    /// Moves a pending claim to a terminal status
    ///
    /// Returns `false` without writing if the claim is no longer pending.
    async fn set_claim_status(
        &self,
        id: StagedClaimId,
        status: StagingStatus,
        reason: Option<QuarantineReason>,
    ) -> Result<bool, PortError>;

    /// Moves a pending service line to a terminal status
    ///
    /// Returns `false` without writing if the line is no longer pending.
    async fn set_service_status(
        &self,
        id: ServiceLineId,
        status: StagingStatus,
        reason: Option<QuarantineReason>,
    ) -> Result<bool, PortError>;

    /// Quarantined claims for operator review, newest first
    async fn quarantined_claims(&self, limit: u32) -> Result<Vec<StagedClaim>, PortError>;

    /// Quarantined service lines for operator review, newest first
    async fn quarantined_services(&self, limit: u32) -> Result<Vec<StagedClaimService>, PortError>;
}

/// Storage operations for identifier reservations and batch watermarks
#[async_trait]
pub trait WatermarkPort: DomainPort + HealthCheckable {
    /// Reserves `capacity` identifiers for a batch and records the block as open
    async fn reserve(
        &self,
        run_id: BatchRunId,
        kind: EntityKind,
        capacity: u64,
    ) -> Result<Reservation, PortError>;

    /// Number of staged rows of `kind` with ids in `first..=last`
    async fn count_staged(&self, kind: EntityKind, first: i64, last: i64) -> Result<u64, PortError>;

    /// Records watermarks and closes their reservations, all or nothing
    async fn commit(&self, commits: Vec<RangeCommit>) -> Result<Vec<BatchWatermark>, PortError>;

    /// Closes a reservation without a watermark and deletes the rows staged
    /// in its block; returns the number of deleted rows
    async fn release(&self, reservation: &Reservation) -> Result<u64, PortError>;

    /// Releases every reservation opened before `reserved_before`
    async fn release_stale(&self, reserved_before: DateTime<Utc>) -> Result<Vec<Reservation>, PortError>;

    /// Committed ranges below the visibility horizon that the consumer has
    /// not completed, ordered by first id
    async fn pending_ranges(&self, kind: EntityKind, consumer: &str) -> Result<Vec<BatchWatermark>, PortError>;

    /// Takes or renews a lease on a range for a worker
    ///
    /// Returns `false` when the range is completed or leased to another
    /// worker whose lease has not expired.
    async fn try_lease(
        &self,
        watermark_id: WatermarkId,
        consumer: &str,
        worker: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, PortError>;

    /// Marks a range as completed for the consumer
    async fn mark_consumed(&self, watermark_id: WatermarkId, consumer: &str) -> Result<(), PortError>;

    /// The committed watermark covering `id`, if any
    async fn find_covering(&self, kind: EntityKind, id: i64) -> Result<Option<BatchWatermark>, PortError>;

    /// The watermark a run committed for `kind`, if any
    async fn find_for_run(&self, run_id: BatchRunId, kind: EntityKind) -> Result<Option<BatchWatermark>, PortError>;
}

/// In-memory implementations of the intake ports for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use core_kernel::{AtomicIdAllocator, HealthCheckResult, IdAllocator};

    use crate::promotion::{PromotedClaim, PromotionPort};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Consumption {
        Leased { worker: String, until: DateTime<Utc> },
        Done,
    }

    #[derive(Debug, Default)]
    struct StoreState {
        claims: BTreeMap<StagedClaimId, StagedClaim>,
        services: BTreeMap<ServiceLineId, StagedClaimService>,
        claim_refs: HashMap<ClaimRef, StagedClaimId>,
        open: Vec<Reservation>,
        watermarks: Vec<BatchWatermark>,
        consumption: HashMap<(WatermarkId, String), Consumption>,
        writes_fail: bool,
    }

    impl StoreState {
        fn count_staged(&self, kind: EntityKind, first: i64, last: i64) -> u64 {
            match kind {
                EntityKind::StagedClaim => self
                    .claims
                    .range(StagedClaimId::new(first)..=StagedClaimId::new(last))
                    .count() as u64,
                EntityKind::StagedClaimService => self
                    .services
                    .range(ServiceLineId::new(first)..=ServiceLineId::new(last))
                    .count() as u64,
            }
        }

        fn remove_block(&mut self, reservation: &Reservation) -> u64 {
            let (first, last) = (reservation.block.first(), reservation.block.last());
            match reservation.kind {
                EntityKind::StagedClaim => {
                    let ids: Vec<_> = self
                        .claims
                        .range(StagedClaimId::new(first)..=StagedClaimId::new(last))
                        .map(|(id, _)| *id)
                        .collect();
                    for id in &ids {
                        if let Some(claim) = self.claims.remove(id) {
                            self.claim_refs.remove(&claim.claim_ref());
                        }
                    }
                    ids.len() as u64
                }
                EntityKind::StagedClaimService => {
                    let ids: Vec<_> = self
                        .services
                        .range(ServiceLineId::new(first)..=ServiceLineId::new(last))
                        .map(|(id, _)| *id)
                        .collect();
                    for id in &ids {
                        self.services.remove(id);
                    }
                    ids.len() as u64
                }
            }
        }

        fn check_writable(&self) -> Result<(), PortError> {
            if self.writes_fail {
                return Err(PortError::connection("staging store unavailable"));
            }
            Ok(())
        }

        fn holds(&self, run_id: BatchRunId, kind: EntityKind, id: i64) -> bool {
            self.open
                .iter()
                .any(|r| r.run_id == run_id && r.kind == kind && r.block.contains(id))
        }

        fn close(&mut self, reservation: &Reservation) -> bool {
            let before = self.open.len();
            self.open
                .retain(|r| !(r.kind == reservation.kind && r.block == reservation.block));
            self.open.len() != before
        }
    }

    /// In-memory staging store implementing both intake ports
    ///
    /// One lock guards all state, which gives the same all-or-nothing
    /// behaviour as the database transactions of the real adapter.
    #[derive(Debug, Clone)]
    pub struct MockStagingStore {
        state: Arc<Mutex<StoreState>>,
        claim_ids: Arc<AtomicIdAllocator>,
        service_ids: Arc<AtomicIdAllocator>,
        watermark_ids: Arc<AtomicIdAllocator>,
    }

    impl Default for MockStagingStore {
        fn default() -> Self {
            Self {
                state: Arc::new(Mutex::new(StoreState::default())),
                claim_ids: Arc::new(AtomicIdAllocator::new()),
                service_ids: Arc::new(AtomicIdAllocator::new()),
                watermark_ids: Arc::new(AtomicIdAllocator::new()),
            }
        }
    }

    impl MockStagingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every staged claim, ordered by id
        pub async fn all_claims(&self) -> Vec<StagedClaim> {
            self.state.lock().await.claims.values().cloned().collect()
        }

        /// Every staged service line, ordered by id
        pub async fn all_services(&self) -> Vec<StagedClaimService> {
            self.state.lock().await.services.values().cloned().collect()
        }

        /// Every committed watermark, in commit order
        pub async fn all_watermarks(&self) -> Vec<BatchWatermark> {
            self.state.lock().await.watermarks.clone()
        }

        /// Reservations that are still open
        pub async fn open_reservations(&self) -> Vec<Reservation> {
            self.state.lock().await.open.clone()
        }

        /// Backdates every open reservation, simulating a crashed run
        pub async fn age_reservations(&self, by: chrono::Duration) {
            for reservation in self.state.lock().await.open.iter_mut() {
                reservation.reserved_at = reservation.reserved_at - by;
            }
        }

        /// Makes staging inserts and reservation releases fail as if the
        /// store were unreachable
        pub async fn fail_writes(&self, fail: bool) {
            self.state.lock().await.writes_fail = fail;
        }

        fn allocator(&self, kind: EntityKind) -> &AtomicIdAllocator {
            match kind {
                EntityKind::StagedClaim => &self.claim_ids,
                EntityKind::StagedClaimService => &self.service_ids,
            }
        }
    }

    impl DomainPort for MockStagingStore {}

    #[async_trait]
    impl HealthCheckable for MockStagingStore {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("mock-staging-store")
        }
    }

    #[async_trait]
    impl StagingPort for MockStagingStore {
        async fn insert_claim(
            &self,
            claim: StagedClaim,
            services: Vec<StagedClaimService>,
        ) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            state.check_writable()?;
            if !state.holds(claim.run_id, EntityKind::StagedClaim, claim.id.value()) {
                return Err(PortError::conflict(format!(
                    "run {} holds no open reservation for {}",
                    claim.run_id, claim.id
                )));
            }
            if let Some(service) = services
                .iter()
                .find(|s| !state.holds(claim.run_id, EntityKind::StagedClaimService, s.id.value()))
            {
                return Err(PortError::conflict(format!(
                    "run {} holds no open reservation for {}",
                    claim.run_id, service.id
                )));
            }
            let claim_ref = claim.claim_ref();
            if state.claim_refs.contains_key(&claim_ref) {
                return Err(PortError::conflict(format!("claim {} already staged", claim_ref)));
            }
            if state.claims.contains_key(&claim.id) {
                return Err(PortError::conflict(format!("key {} already used", claim.id)));
            }
            let mut seen = HashSet::new();
            for service in &services {
                if state.services.contains_key(&service.id) || !seen.insert(service.id) {
                    return Err(PortError::conflict(format!("key {} already used", service.id)));
                }
            }
            state.claim_refs.insert(claim_ref, claim.id);
            state.claims.insert(claim.id, claim);
            for service in services {
                state.services.insert(service.id, service);
            }
            Ok(())
        }

        async fn get_claim(&self, id: StagedClaimId) -> Result<Option<StagedClaim>, PortError> {
            Ok(self.state.lock().await.claims.get(&id).cloned())
        }

        async fn find_claim_by_ref(&self, claim_ref: &ClaimRef) -> Result<Option<StagedClaim>, PortError> {
            let state = self.state.lock().await;
            Ok(state
                .claim_refs
                .get(claim_ref)
                .and_then(|id| state.claims.get(id))
                .cloned())
        }

        async fn claims_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaim>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .claims
                .range(StagedClaimId::new(first)..=StagedClaimId::new(last))
                .map(|(_, claim)| claim.clone())
                .collect())
        }

        async fn services_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaimService>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .services
                .range(ServiceLineId::new(first)..=ServiceLineId::new(last))
                .map(|(_, service)| service.clone())
                .collect())
        }

        async fn services_for_claim(&self, claim_id: StagedClaimId) -> Result<Vec<StagedClaimService>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .services
                .values()
                .filter(|s| s.parent_id == Some(claim_id))
                .cloned()
                .collect())
        }

        async fn link_service_parent(
            &self,
            service_id: ServiceLineId,
            parent_id: StagedClaimId,
        ) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            let service = state
                .services
                .get_mut(&service_id)
                .ok_or_else(|| PortError::not_found("StagedClaimService", service_id))?;
            service.parent_id = Some(parent_id);
            Ok(())
        }

        async fn set_claim_status(
            &self,
            id: StagedClaimId,
            status: StagingStatus,
            reason: Option<QuarantineReason>,
        ) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            let claim = state
                .claims
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("StagedClaim", id))?;
            if !claim.is_pending() {
                return Ok(false);
            }
            claim.status = status;
            claim.quarantine_reason = reason;
            claim.processed = status.is_processed();
            Ok(true)
        }

        async fn set_service_status(
            &self,
            id: ServiceLineId,
            status: StagingStatus,
            reason: Option<QuarantineReason>,
        ) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            let service = state
                .services
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("StagedClaimService", id))?;
            if !service.is_pending() {
                return Ok(false);
            }
            service.status = status;
            service.quarantine_reason = reason;
            Ok(true)
        }

        async fn quarantined_claims(&self, limit: u32) -> Result<Vec<StagedClaim>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .claims
                .values()
                .rev()
                .filter(|c| c.status == StagingStatus::Quarantined)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn quarantined_services(&self, limit: u32) -> Result<Vec<StagedClaimService>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .services
                .values()
                .rev()
                .filter(|s| s.status == StagingStatus::Quarantined)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl WatermarkPort for MockStagingStore {
        async fn reserve(
            &self,
            run_id: BatchRunId,
            kind: EntityKind,
            capacity: u64,
        ) -> Result<Reservation, PortError> {
            let mut state = self.state.lock().await;
            let block = self
                .allocator(kind)
                .reserve(capacity)
                .map_err(|e| PortError::validation(e.to_string()))?;
            let reservation = Reservation {
                run_id,
                kind,
                block,
                reserved_at: Utc::now(),
            };
            state.open.push(reservation.clone());
            Ok(reservation)
        }

        async fn count_staged(&self, kind: EntityKind, first: i64, last: i64) -> Result<u64, PortError> {
            Ok(self.state.lock().await.count_staged(kind, first, last))
        }

        async fn commit(&self, commits: Vec<RangeCommit>) -> Result<Vec<BatchWatermark>, PortError> {
            let mut state = self.state.lock().await;
            for commit in &commits {
                let open = state.open.iter().any(|r| {
                    r.kind == commit.reservation.kind && r.block == commit.reservation.block
                });
                if !open {
                    return Err(PortError::conflict(format!(
                        "reservation {}..={} of {} is not open",
                        commit.reservation.block.first(),
                        commit.reservation.block.last(),
                        commit.reservation.kind
                    )));
                }
                if !commit.reservation.block.contains(commit.first_id)
                    || !commit.reservation.block.contains(commit.last_id)
                {
                    return Err(PortError::validation("range lies outside its reservation"));
                }
                let found = state.count_staged(commit.reservation.kind, commit.first_id, commit.last_id);
                if found != commit.len() {
                    return Err(PortError::conflict(format!(
                        "range {}..={} has {} of {} rows",
                        commit.first_id,
                        commit.last_id,
                        found,
                        commit.len()
                    )));
                }
            }

            let mut watermarks = Vec::with_capacity(commits.len());
            for commit in commits {
                let id = self
                    .watermark_ids
                    .reserve(1)
                    .map_err(|e| PortError::internal(e.to_string()))?
                    .first();
                state.close(&commit.reservation);
                let watermark = BatchWatermark {
                    id: WatermarkId::new(id),
                    run_id: commit.reservation.run_id,
                    kind: commit.reservation.kind,
                    first_id: commit.first_id,
                    last_id: commit.last_id,
                    captured_at: Utc::now(),
                };
                state.watermarks.push(watermark.clone());
                watermarks.push(watermark);
            }
            Ok(watermarks)
        }

        async fn release(&self, reservation: &Reservation) -> Result<u64, PortError> {
            let mut state = self.state.lock().await;
            state.check_writable()?;
            if !state.close(reservation) {
                return Ok(0);
            }
            Ok(state.remove_block(reservation))
        }

        async fn release_stale(&self, reserved_before: DateTime<Utc>) -> Result<Vec<Reservation>, PortError> {
            let mut state = self.state.lock().await;
            let stale: Vec<Reservation> = state
                .open
                .iter()
                .filter(|r| r.reserved_at < reserved_before)
                .cloned()
                .collect();
            for reservation in &stale {
                state.close(reservation);
                state.remove_block(reservation);
            }
            Ok(stale)
        }

        async fn pending_ranges(&self, kind: EntityKind, consumer: &str) -> Result<Vec<BatchWatermark>, PortError> {
            let state = self.state.lock().await;
            let horizon = state
                .open
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.block.first())
                .min()
                .unwrap_or(i64::MAX);
            let mut ranges: Vec<BatchWatermark> = state
                .watermarks
                .iter()
                .filter(|w| w.kind == kind && w.first_id < horizon)
                .filter(|w| {
                    state.consumption.get(&(w.id, consumer.to_string())) != Some(&Consumption::Done)
                })
                .cloned()
                .collect();
            ranges.sort_by_key(|w| w.first_id);
            Ok(ranges)
        }

        async fn try_lease(
            &self,
            watermark_id: WatermarkId,
            consumer: &str,
            worker: &str,
            lease_until: DateTime<Utc>,
        ) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            let key = (watermark_id, consumer.to_string());
            let available = match state.consumption.get(&key) {
                None => true,
                Some(Consumption::Done) => false,
                Some(Consumption::Leased { worker: holder, until }) => {
                    holder == worker || *until < Utc::now()
                }
            };
            if available {
                state.consumption.insert(
                    key,
                    Consumption::Leased {
                        worker: worker.to_string(),
                        until: lease_until,
                    },
                );
            }
            Ok(available)
        }

        async fn mark_consumed(&self, watermark_id: WatermarkId, consumer: &str) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            if !state.watermarks.iter().any(|w| w.id == watermark_id) {
                return Err(PortError::not_found("BatchWatermark", watermark_id));
            }
            state
                .consumption
                .insert((watermark_id, consumer.to_string()), Consumption::Done);
            Ok(())
        }

        async fn find_covering(&self, kind: EntityKind, id: i64) -> Result<Option<BatchWatermark>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .watermarks
                .iter()
                .find(|w| w.kind == kind && w.contains(id))
                .cloned())
        }

        async fn find_for_run(&self, run_id: BatchRunId, kind: EntityKind) -> Result<Option<BatchWatermark>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .watermarks
                .iter()
                .find(|w| w.kind == kind && w.run_id == run_id)
                .cloned())
        }
    }

    /// Promotion collaborator that records what it receives
    #[derive(Debug, Default, Clone)]
    pub struct RecordingPromotionPort {
        promoted: Arc<Mutex<Vec<PromotedClaim>>>,
        late_lines: Arc<Mutex<Vec<StagedClaimService>>>,
        failing: Arc<Mutex<HashSet<StagedClaimId>>>,
    }

    impl RecordingPromotionPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes promotion of the given claim fail with a connection error
        pub async fn fail_for(&self, claim_id: StagedClaimId) {
            self.failing.lock().await.insert(claim_id);
        }

        pub async fn recover(&self, claim_id: StagedClaimId) {
            self.failing.lock().await.remove(&claim_id);
        }

        pub async fn promoted(&self) -> Vec<PromotedClaim> {
            self.promoted.lock().await.clone()
        }

        pub async fn late_lines(&self) -> Vec<StagedClaimService> {
            self.late_lines.lock().await.clone()
        }
    }

    impl DomainPort for RecordingPromotionPort {}

    #[async_trait]
    impl PromotionPort for RecordingPromotionPort {
        async fn promote(&self, claim: &PromotedClaim) -> Result<(), PortError> {
            if self.failing.lock().await.contains(&claim.claim.id) {
                return Err(PortError::connection("promotion target unavailable"));
            }
            self.promoted.lock().await.push(claim.clone());
            Ok(())
        }

        async fn promote_lines(
            &self,
            parent: &StagedClaim,
            lines: &[StagedClaimService],
        ) -> Result<(), PortError> {
            if self.failing.lock().await.contains(&parent.id) {
                return Err(PortError::connection("promotion target unavailable"));
            }
            self.late_lines.lock().await.extend_from_slice(lines);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockStagingStore;
    use super::*;
    use chrono::NaiveDate;
    use core_kernel::{ChannelId, ExternalClaimId};
    use rust_decimal_macros::dec;

    fn claim(run_id: BatchRunId, id: i64, external: &str) -> StagedClaim {
        StagedClaim {
            id: StagedClaimId::new(id),
            run_id,
            external_claim_id: ExternalClaimId::new(external),
            channel_id: ChannelId::new(1),
            scheme_code: "SCH".to_string(),
            provider_code: "PRV".to_string(),
            member_number: "MEM".to_string(),
            benefit_id: "BEN".to_string(),
            amount: dec!(100),
            invoice_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            status: StagingStatus::Pending,
            quarantine_reason: None,
            processed: false,
            inserted_at: Utc::now(),
        }
    }

    async fn reserve_claims(store: &MockStagingStore, capacity: u64) -> Reservation {
        store
            .reserve(BatchRunId::new(), EntityKind::StagedClaim, capacity)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_rejects_duplicate_ref() {
        let store = MockStagingStore::new();
        let run = reserve_claims(&store, 2).await.run_id;
        store.insert_claim(claim(run, 1, "CLM-1"), vec![]).await.unwrap();
        let err = store.insert_claim(claim(run, 2, "CLM-1"), vec![]).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.all_claims().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_rejects_rows_outside_open_reservation() {
        let store = MockStagingStore::new();
        let reservation = reserve_claims(&store, 2).await;

        let other_run = store
            .insert_claim(claim(BatchRunId::new(), 1, "CLM-1"), vec![])
            .await
            .unwrap_err();
        assert!(other_run.is_conflict());

        let beyond_block = store
            .insert_claim(claim(reservation.run_id, 3, "CLM-3"), vec![])
            .await
            .unwrap_err();
        assert!(beyond_block.is_conflict());

        store.release(&reservation).await.unwrap();
        let released = store
            .insert_claim(claim(reservation.run_id, 1, "CLM-1"), vec![])
            .await
            .unwrap_err();
        assert!(released.is_conflict());
        assert!(store.all_claims().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_status_is_compare_and_set() {
        let store = MockStagingStore::new();
        let run = reserve_claims(&store, 1).await.run_id;
        store.insert_claim(claim(run, 1, "CLM-1"), vec![]).await.unwrap();
        let id = StagedClaimId::new(1);

        assert!(store.set_claim_status(id, StagingStatus::Promoted, None).await.unwrap());
        assert!(!store
            .set_claim_status(id, StagingStatus::Quarantined, Some(QuarantineReason::UnknownChannel))
            .await
            .unwrap());

        let stored = store.get_claim(id).await.unwrap().unwrap();
        assert_eq!(stored.status, StagingStatus::Promoted);
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn test_mock_horizon_hides_later_ranges() {
        let store = MockStagingStore::new();
        let early = reserve_claims(&store, 5).await;
        let late = reserve_claims(&store, 5).await;

        store.insert_claim(claim(late.run_id, 6, "CLM-6"), vec![]).await.unwrap();
        store
            .commit(vec![RangeCommit { reservation: late, first_id: 6, last_id: 6 }])
            .await
            .unwrap();
        assert!(store.pending_ranges(EntityKind::StagedClaim, "validator").await.unwrap().is_empty());

        store.release(&early).await.unwrap();
        let visible = store.pending_ranges(EntityKind::StagedClaim, "validator").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!((visible[0].first_id, visible[0].last_id), (6, 6));
    }

    #[tokio::test]
    async fn test_mock_lease_excludes_other_workers() {
        let store = MockStagingStore::new();
        let reservation = reserve_claims(&store, 1).await;
        store.insert_claim(claim(reservation.run_id, 1, "CLM-1"), vec![]).await.unwrap();
        let watermark = store
            .commit(vec![RangeCommit { reservation, first_id: 1, last_id: 1 }])
            .await
            .unwrap()
            .remove(0);

        let until = Utc::now() + chrono::Duration::minutes(5);
        assert!(store.try_lease(watermark.id, "validator", "w1", until).await.unwrap());
        assert!(!store.try_lease(watermark.id, "validator", "w2", until).await.unwrap());
        assert!(store.try_lease(watermark.id, "auditor", "w2", until).await.unwrap());

        store.mark_consumed(watermark.id, "validator").await.unwrap();
        assert!(!store.try_lease(watermark.id, "validator", "w1", until).await.unwrap());
    }
}
