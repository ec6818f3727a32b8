//! PostgreSQL intake adapter
//!
//! Implements both `StagingPort` and `WatermarkPort` over one pool. The two
//! ports must share a database: committing a watermark counts the staged rows
//! it covers inside the same transaction that records it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use core_kernel::{
    BatchRunId, ChannelId, DomainPort, ExternalClaimId, HealthCheckResult, HealthCheckable, IdBlock,
    PortError, ServiceLineId, StagedClaimId, WatermarkId,
};
use domain_intake::{
    BatchWatermark, ClaimRef, EntityKind, QuarantineReason, RangeCommit, Reservation, StagedClaim,
    StagedClaimService, StagingPort, StagingStatus, WatermarkPort,
};

use crate::error::DatabaseError;
use crate::repositories::staging::{StagedClaimRow, StagedServiceRow, StagingRepository};
use crate::repositories::watermark::{RangeCommitParams, ReservationRow, WatermarkRepository, WatermarkRow};

/// PostgreSQL-backed staging and watermark storage
#[derive(Debug, Clone)]
pub struct PostgresIntakeAdapter {
    staging: StagingRepository,
    watermarks: WatermarkRepository,
    pool: PgPool,
}

impl PostgresIntakeAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            staging: StagingRepository::new(pool.clone()),
            watermarks: WatermarkRepository::new(pool.clone()),
            pool,
        }
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn parse_status(value: &str) -> Result<StagingStatus, DatabaseError> {
    value.parse().map_err(|e| DatabaseError::decode("status", e))
}

fn parse_reason(value: Option<&str>) -> Result<Option<QuarantineReason>, DatabaseError> {
    value
        .map(|v| v.parse().map_err(|e| DatabaseError::decode("quarantine_reason", e)))
        .transpose()
}

fn parse_kind(value: &str) -> Result<EntityKind, DatabaseError> {
    value.parse().map_err(|e| DatabaseError::decode("entity_kind", e))
}

impl From<&StagedClaim> for StagedClaimRow {
    fn from(claim: &StagedClaim) -> Self {
        StagedClaimRow {
            staged_claim_id: claim.id.value(),
            run_id: *claim.run_id.as_uuid(),
            external_claim_id: claim.external_claim_id.as_str().to_string(),
            channel_id: claim.channel_id.value(),
            scheme_code: claim.scheme_code.clone(),
            provider_code: claim.provider_code.clone(),
            member_number: claim.member_number.clone(),
            benefit_id: claim.benefit_id.clone(),
            amount: claim.amount,
            invoice_date: claim.invoice_date,
            status: claim.status.as_str().to_string(),
            quarantine_reason: claim.quarantine_reason.map(|r| r.as_str().to_string()),
            processed: claim.processed,
            inserted_at: claim.inserted_at,
        }
    }
}

impl TryFrom<StagedClaimRow> for StagedClaim {
    type Error = DatabaseError;

    fn try_from(row: StagedClaimRow) -> Result<Self, Self::Error> {
        Ok(StagedClaim {
            id: StagedClaimId::new(row.staged_claim_id),
            run_id: BatchRunId::from_uuid(row.run_id),
            external_claim_id: ExternalClaimId::new(row.external_claim_id),
            channel_id: ChannelId::new(row.channel_id),
            scheme_code: row.scheme_code,
            provider_code: row.provider_code,
            member_number: row.member_number,
            benefit_id: row.benefit_id,
            amount: row.amount,
            invoice_date: row.invoice_date,
            status: parse_status(&row.status)?,
            quarantine_reason: parse_reason(row.quarantine_reason.as_deref())?,
            processed: row.processed,
            inserted_at: row.inserted_at,
        })
    }
}

impl From<&StagedClaimService> for StagedServiceRow {
    fn from(service: &StagedClaimService) -> Self {
        StagedServiceRow {
            service_line_id: service.id.value(),
            run_id: *service.run_id.as_uuid(),
            channel_id: service.claim_ref.channel_id.value(),
            claim_external_id: service.claim_ref.external_claim_id.as_str().to_string(),
            parent_id: service.parent_id.map(|id| id.value()),
            line_number: service.line_number,
            service_code: service.service_code.clone(),
            quantity: service.quantity,
            amount: service.amount,
            diagnosis_code: service.diagnosis_code.clone(),
            picked: service.picked,
            status: service.status.as_str().to_string(),
            quarantine_reason: service.quarantine_reason.map(|r| r.as_str().to_string()),
            inserted_at: service.inserted_at,
        }
    }
}

impl TryFrom<StagedServiceRow> for StagedClaimService {
    type Error = DatabaseError;

    fn try_from(row: StagedServiceRow) -> Result<Self, Self::Error> {
        Ok(StagedClaimService {
            id: ServiceLineId::new(row.service_line_id),
            run_id: BatchRunId::from_uuid(row.run_id),
            claim_ref: ClaimRef::new(ChannelId::new(row.channel_id), row.claim_external_id),
            parent_id: row.parent_id.map(StagedClaimId::new),
            line_number: row.line_number,
            service_code: row.service_code,
            quantity: row.quantity,
            amount: row.amount,
            diagnosis_code: row.diagnosis_code,
            picked: row.picked,
            status: parse_status(&row.status)?,
            quarantine_reason: parse_reason(row.quarantine_reason.as_deref())?,
            inserted_at: row.inserted_at,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = DatabaseError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            run_id: BatchRunId::from_uuid(row.run_id),
            kind: parse_kind(&row.entity_kind)?,
            block: IdBlock::new(row.first_id, row.last_id)
                .map_err(|e| DatabaseError::decode("first_id", e))?,
            reserved_at: row.reserved_at,
        })
    }
}

impl TryFrom<WatermarkRow> for BatchWatermark {
    type Error = DatabaseError;

    fn try_from(row: WatermarkRow) -> Result<Self, Self::Error> {
        Ok(BatchWatermark {
            id: WatermarkId::new(row.watermark_id),
            run_id: BatchRunId::from_uuid(row.run_id),
            kind: parse_kind(&row.entity_kind)?,
            first_id: row.first_id,
            last_id: row.last_id,
            captured_at: row.captured_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, PortError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(PortError::from))
        .collect()
}

fn limit(value: u32) -> i64 {
    i64::from(value)
}

// ============================================================================
// Ports
// ============================================================================

impl DomainPort for PostgresIntakeAdapter {}

#[async_trait]
impl HealthCheckable for PostgresIntakeAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        super::probe(&self.pool, "postgres-intake-adapter").await
    }
}

#[async_trait]
impl StagingPort for PostgresIntakeAdapter {
    async fn insert_claim(
        &self,
        claim: StagedClaim,
        services: Vec<StagedClaimService>,
    ) -> Result<(), PortError> {
        let claim_row = StagedClaimRow::from(&claim);
        let service_rows: Vec<StagedServiceRow> = services.iter().map(StagedServiceRow::from).collect();
        match self.staging.insert_claim(&claim_row, &service_rows).await {
            Ok(()) => Ok(()),
            Err(DatabaseError::DuplicateEntry(message)) => Err(PortError::conflict(format!(
                "claim {} already staged: {}",
                claim.claim_ref(),
                message
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_claim(&self, id: StagedClaimId) -> Result<Option<StagedClaim>, PortError> {
        self.staging
            .get_claim(id.value())
            .await?
            .map(StagedClaim::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn find_claim_by_ref(&self, claim_ref: &ClaimRef) -> Result<Option<StagedClaim>, PortError> {
        self.staging
            .find_claim_by_ref(claim_ref.channel_id.value(), claim_ref.external_claim_id.as_str())
            .await?
            .map(StagedClaim::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn claims_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaim>, PortError> {
        convert_all(self.staging.claims_in_range(first, last).await?)
    }

    async fn services_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaimService>, PortError> {
        convert_all(self.staging.services_in_range(first, last).await?)
    }

    async fn services_for_claim(&self, claim_id: StagedClaimId) -> Result<Vec<StagedClaimService>, PortError> {
        convert_all(self.staging.services_for_claim(claim_id.value()).await?)
    }

    async fn link_service_parent(
        &self,
        service_id: ServiceLineId,
        parent_id: StagedClaimId,
    ) -> Result<(), PortError> {
        Ok(self
            .staging
            .link_service_parent(service_id.value(), parent_id.value())
            .await?)
    }

    async fn set_claim_status(
        &self,
        id: StagedClaimId,
        status: StagingStatus,
        reason: Option<QuarantineReason>,
    ) -> Result<bool, PortError> {
        Ok(self
            .staging
            .set_claim_status(id.value(), status.as_str(), reason.map(|r| r.as_str()), status.is_processed())
            .await?)
    }

    async fn set_service_status(
        &self,
        id: ServiceLineId,
        status: StagingStatus,
        reason: Option<QuarantineReason>,
    ) -> Result<bool, PortError> {
        Ok(self
            .staging
            .set_service_status(id.value(), status.as_str(), reason.map(|r| r.as_str()))
            .await?)
    }

    async fn quarantined_claims(&self, max: u32) -> Result<Vec<StagedClaim>, PortError> {
        convert_all(self.staging.quarantined_claims(limit(max)).await?)
    }

    async fn quarantined_services(&self, max: u32) -> Result<Vec<StagedClaimService>, PortError> {
        convert_all(self.staging.quarantined_services(limit(max)).await?)
    }
}

#[async_trait]
impl WatermarkPort for PostgresIntakeAdapter {
    async fn reserve(
        &self,
        run_id: BatchRunId,
        kind: EntityKind,
        capacity: u64,
    ) -> Result<Reservation, PortError> {
        let capacity = i64::try_from(capacity)
            .map_err(|_| PortError::validation(format!("capacity {} overflows i64", capacity)))?;
        let row = self
            .watermarks
            .reserve(*run_id.as_uuid(), kind.as_str(), capacity)
            .await?;
        Ok(Reservation::try_from(row)?)
    }

    async fn count_staged(&self, kind: EntityKind, first: i64, last: i64) -> Result<u64, PortError> {
        let count = self.watermarks.count_staged(kind.as_str(), first, last).await?;
        Ok(count.max(0) as u64)
    }

    async fn commit(&self, commits: Vec<RangeCommit>) -> Result<Vec<BatchWatermark>, PortError> {
        let params: Vec<RangeCommitParams> = commits
            .iter()
            .map(|commit| RangeCommitParams {
                run_id: *commit.reservation.run_id.as_uuid(),
                entity_kind: commit.reservation.kind.as_str().to_string(),
                block_first: commit.reservation.block.first(),
                block_last: commit.reservation.block.last(),
                first_id: commit.first_id,
                last_id: commit.last_id,
            })
            .collect();

        match self.watermarks.commit(&params).await {
            Ok(rows) => convert_all(rows),
            // A closed reservation or a short range means another actor got there first
            Err(DatabaseError::NotFound(message)) | Err(DatabaseError::ConstraintViolation(message)) => {
                warn!(%message, "Watermark commit refused");
                Err(PortError::conflict(message))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, reservation: &Reservation) -> Result<u64, PortError> {
        Ok(self
            .watermarks
            .release(
                reservation.kind.as_str(),
                reservation.block.first(),
                reservation.block.last(),
            )
            .await?)
    }

    async fn release_stale(&self, reserved_before: DateTime<Utc>) -> Result<Vec<Reservation>, PortError> {
        convert_all(self.watermarks.release_stale(reserved_before).await?)
    }

    async fn pending_ranges(&self, kind: EntityKind, consumer: &str) -> Result<Vec<BatchWatermark>, PortError> {
        convert_all(self.watermarks.pending_ranges(kind.as_str(), consumer).await?)
    }

    async fn try_lease(
        &self,
        watermark_id: WatermarkId,
        consumer: &str,
        worker: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        Ok(self
            .watermarks
            .try_lease(watermark_id.value(), consumer, worker, lease_until)
            .await?)
    }

    async fn mark_consumed(&self, watermark_id: WatermarkId, consumer: &str) -> Result<(), PortError> {
        match self.watermarks.mark_consumed(watermark_id.value(), consumer).await {
            Err(DatabaseError::NotFound(_)) => Err(PortError::not_found("BatchWatermark", watermark_id)),
            other => Ok(other?),
        }
    }

    async fn find_covering(&self, kind: EntityKind, id: i64) -> Result<Option<BatchWatermark>, PortError> {
        self.watermarks
            .find_covering(kind.as_str(), id)
            .await?
            .map(BatchWatermark::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn find_for_run(&self, run_id: BatchRunId, kind: EntityKind) -> Result<Option<BatchWatermark>, PortError> {
        self.watermarks
            .find_for_run(*run_id.as_uuid(), kind.as_str())
            .await?
            .map(BatchWatermark::try_from)
            .transpose()
            .map_err(PortError::from)
    }
}
