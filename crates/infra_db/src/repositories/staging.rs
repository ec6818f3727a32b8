//! Staging repository
//!
//! Claims and their service lines are written in one transaction, which
//! first takes a share lock on the run's open reservations. A released block
//! therefore never receives rows: either the release waits for the insert and
//! deletes its rows, or the insert finds the reservation gone. Status updates
//! only apply to rows still in `PENDING`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Row of the `staged_claims` table
#[derive(Debug, Clone, FromRow)]
pub struct StagedClaimRow {
    pub staged_claim_id: i64,
    pub run_id: Uuid,
    pub external_claim_id: String,
    pub channel_id: i64,
    pub scheme_code: String,
    pub provider_code: String,
    pub member_number: String,
    pub benefit_id: String,
    pub amount: Decimal,
    pub invoice_date: NaiveDate,
    pub status: String,
    pub quarantine_reason: Option<String>,
    pub processed: bool,
    pub inserted_at: DateTime<Utc>,
}

/// Row of the `staged_claim_services` table
#[derive(Debug, Clone, FromRow)]
pub struct StagedServiceRow {
    pub service_line_id: i64,
    pub run_id: Uuid,
    pub channel_id: i64,
    pub claim_external_id: String,
    pub parent_id: Option<i64>,
    pub line_number: i32,
    pub service_code: String,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub diagnosis_code: Option<String>,
    pub picked: bool,
    pub status: String,
    pub quarantine_reason: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

const CLAIM_COLUMNS: &str = "staged_claim_id, run_id, external_claim_id, channel_id, scheme_code, \
    provider_code, member_number, benefit_id, amount, invoice_date, status, quarantine_reason, \
    processed, inserted_at";

const SERVICE_COLUMNS: &str = "service_line_id, run_id, channel_id, claim_external_id, parent_id, \
    line_number, service_code, quantity, amount, diagnosis_code, picked, status, quarantine_reason, \
    inserted_at";

const CLAIM_KIND: &str = "staged_claim";
const SERVICE_KIND: &str = "staged_claim_service";

/// Share-locks the run's open reservation covering `first..=last`
///
/// The lock is held until the transaction ends, so a concurrent release of
/// the block waits for it.
async fn hold_reservation(
    tx: &mut Transaction<'_, Postgres>,
    entity_kind: &str,
    run_id: Uuid,
    first: i64,
    last: i64,
) -> Result<(), DatabaseError> {
    let held: Option<i64> = sqlx::query_scalar(
        "SELECT first_id FROM batch_reservations \
         WHERE entity_kind = $1 AND run_id = $2 AND first_id <= $3 AND last_id >= $4 \
         FOR SHARE",
    )
    .bind(entity_kind)
    .bind(run_id)
    .bind(first)
    .bind(last)
    .fetch_optional(&mut **tx)
    .await?;
    match held {
        Some(_) => Ok(()),
        None => Err(DatabaseError::ReservationClosed(format!(
            "{entity_kind} {first}..={last} of run {run_id}"
        ))),
    }
}

/// Repository for staged claims and service lines
#[derive(Debug, Clone)]
pub struct StagingRepository {
    pool: PgPool,
}

impl StagingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a claim and its service lines atomically
    ///
    /// # Errors
    ///
    /// - `DatabaseError::DuplicateEntry` if the `(channel_id, external_claim_id)`
    ///   pair or a key already exists
    /// - `DatabaseError::ReservationClosed` if the run no longer holds an open
    ///   reservation covering the claim or its lines
    ///
    /// Nothing is written in either case.
    #[instrument(skip(self, claim, services), fields(staged_claim_id = claim.staged_claim_id, lines = services.len()))]
    pub async fn insert_claim(
        &self,
        claim: &StagedClaimRow,
        services: &[StagedServiceRow],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        hold_reservation(&mut tx, CLAIM_KIND, claim.run_id, claim.staged_claim_id, claim.staged_claim_id).await?;
        let line_ids = services.iter().map(|s| s.service_line_id);
        if let (Some(first), Some(last)) = (line_ids.clone().min(), line_ids.max()) {
            hold_reservation(&mut tx, SERVICE_KIND, claim.run_id, first, last).await?;
        }

        sqlx::query(&format!(
            "INSERT INTO staged_claims ({CLAIM_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(claim.staged_claim_id)
        .bind(claim.run_id)
        .bind(&claim.external_claim_id)
        .bind(claim.channel_id)
        .bind(&claim.scheme_code)
        .bind(&claim.provider_code)
        .bind(&claim.member_number)
        .bind(&claim.benefit_id)
        .bind(claim.amount)
        .bind(claim.invoice_date)
        .bind(&claim.status)
        .bind(&claim.quarantine_reason)
        .bind(claim.processed)
        .bind(claim.inserted_at)
        .execute(&mut *tx)
        .await?;

        for service in services {
            sqlx::query(&format!(
                "INSERT INTO staged_claim_services ({SERVICE_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(service.service_line_id)
            .bind(service.run_id)
            .bind(service.channel_id)
            .bind(&service.claim_external_id)
            .bind(service.parent_id)
            .bind(service.line_number)
            .bind(&service.service_code)
            .bind(service.quantity)
            .bind(service.amount)
            .bind(&service.diagnosis_code)
            .bind(service.picked)
            .bind(&service.status)
            .bind(&service.quarantine_reason)
            .bind(service.inserted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Staged claim committed to storage");
        Ok(())
    }

    pub async fn get_claim(&self, staged_claim_id: i64) -> Result<Option<StagedClaimRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM staged_claims WHERE staged_claim_id = $1"
        ))
        .bind(staged_claim_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_claim_by_ref(
        &self,
        channel_id: i64,
        external_claim_id: &str,
    ) -> Result<Option<StagedClaimRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM staged_claims WHERE channel_id = $1 AND external_claim_id = $2"
        ))
        .bind(channel_id)
        .bind(external_claim_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn claims_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedClaimRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM staged_claims \
             WHERE staged_claim_id BETWEEN $1 AND $2 ORDER BY staged_claim_id"
        ))
        .bind(first)
        .bind(last)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn services_in_range(&self, first: i64, last: i64) -> Result<Vec<StagedServiceRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM staged_claim_services \
             WHERE service_line_id BETWEEN $1 AND $2 ORDER BY service_line_id"
        ))
        .bind(first)
        .bind(last)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn services_for_claim(&self, parent_id: i64) -> Result<Vec<StagedServiceRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM staged_claim_services \
             WHERE parent_id = $1 ORDER BY service_line_id"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn link_service_parent(&self, service_line_id: i64, parent_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE staged_claim_services SET parent_id = $2 WHERE service_line_id = $1",
        )
        .bind(service_line_id)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("StagedClaimService", service_line_id));
        }
        Ok(())
    }

    /// Moves a pending claim to `status`; `false` if it already left `PENDING`
    #[instrument(skip(self))]
    pub async fn set_claim_status(
        &self,
        staged_claim_id: i64,
        status: &str,
        reason: Option<&str>,
        processed: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE staged_claims SET status = $2, quarantine_reason = $3, processed = $4 \
             WHERE staged_claim_id = $1 AND status = 'PENDING'",
        )
        .bind(staged_claim_id)
        .bind(status)
        .bind(reason)
        .bind(processed)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_exists("staged_claims", "staged_claim_id", staged_claim_id)
            .await
            .map(|_| false)
    }

    /// Moves a pending service line to `status`; `false` if it already left `PENDING`
    #[instrument(skip(self))]
    pub async fn set_service_status(
        &self,
        service_line_id: i64,
        status: &str,
        reason: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE staged_claim_services SET status = $2, quarantine_reason = $3 \
             WHERE service_line_id = $1 AND status = 'PENDING'",
        )
        .bind(service_line_id)
        .bind(status)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_exists("staged_claim_services", "service_line_id", service_line_id)
            .await
            .map(|_| false)
    }

    pub async fn quarantined_claims(&self, limit: i64) -> Result<Vec<StagedClaimRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM staged_claims WHERE status = 'QUARANTINED' \
             ORDER BY staged_claim_id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn quarantined_services(&self, limit: i64) -> Result<Vec<StagedServiceRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, StagedServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM staged_claim_services WHERE status = 'QUARANTINED' \
             ORDER BY service_line_id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn ensure_exists(&self, table: &'static str, key: &'static str, id: i64) -> Result<(), DatabaseError> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {table} WHERE {key} = $1)"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            Ok(())
        } else {
            Err(DatabaseError::not_found(table, id))
        }
    }
}
