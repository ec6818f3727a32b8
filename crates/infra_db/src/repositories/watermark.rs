//! Identifier reservations, batch watermarks and consumer progress
//!
//! A reservation advances the per-kind counter in `id_allocators` and records
//! the block in `batch_reservations`. Committing replaces the reservation with
//! a row in `batch_watermarks`. Consumers track their progress per watermark
//! in `watermark_consumption`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Row of the `batch_reservations` table
#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    pub entity_kind: String,
    pub first_id: i64,
    pub last_id: i64,
    pub run_id: Uuid,
    pub reserved_at: DateTime<Utc>,
}

/// Row of the `batch_watermarks` table
#[derive(Debug, Clone, FromRow)]
pub struct WatermarkRow {
    pub watermark_id: i64,
    pub run_id: Uuid,
    pub entity_kind: String,
    pub first_id: i64,
    pub last_id: i64,
    pub captured_at: DateTime<Utc>,
}

/// One range to record when committing a batch
#[derive(Debug, Clone)]
pub struct RangeCommitParams {
    pub run_id: Uuid,
    pub entity_kind: String,
    /// Reserved block being closed
    pub block_first: i64,
    pub block_last: i64,
    /// Committed span inside the block
    pub first_id: i64,
    pub last_id: i64,
}

const WATERMARK_COLUMNS: &str = "watermark_id, run_id, entity_kind, first_id, last_id, captured_at";

/// Table and key column holding staged rows of a kind
fn staged_relation(entity_kind: &str) -> Result<(&'static str, &'static str), DatabaseError> {
    match entity_kind {
        "staged_claim" => Ok(("staged_claims", "staged_claim_id")),
        "staged_claim_service" => Ok(("staged_claim_services", "service_line_id")),
        other => Err(DatabaseError::decode("entity_kind", format!("unknown entity kind '{}'", other))),
    }
}

/// Repository for batch reservations and watermarks
#[derive(Debug, Clone)]
pub struct WatermarkRepository {
    pool: PgPool,
}

impl WatermarkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reserves `capacity` identifiers and records the block as open
    ///
    /// The counter update takes a row lock, so concurrent reservations of the
    /// same kind are serialized and never overlap.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        run_id: Uuid,
        entity_kind: &str,
        capacity: i64,
    ) -> Result<ReservationRow, DatabaseError> {
        if capacity < 1 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "reservation capacity must be positive, got {}",
                capacity
            )));
        }
        let mut tx = self.pool.begin().await?;

        let last_reserved: i64 = sqlx::query_scalar(
            "UPDATE id_allocators SET last_reserved = last_reserved + $2 \
             WHERE entity_kind = $1 RETURNING last_reserved",
        )
        .bind(entity_kind)
        .bind(capacity)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::not_found("IdAllocator", entity_kind))?;

        let reservation = sqlx::query_as::<_, ReservationRow>(
            "INSERT INTO batch_reservations (entity_kind, first_id, last_id, run_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING entity_kind, first_id, last_id, run_id, reserved_at",
        )
        .bind(entity_kind)
        .bind(last_reserved - capacity + 1)
        .bind(last_reserved)
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(first_id = reservation.first_id, last_id = reservation.last_id, "Identifier block reserved");
        Ok(reservation)
    }

    pub async fn count_staged(&self, entity_kind: &str, first: i64, last: i64) -> Result<i64, DatabaseError> {
        let (table, key) = staged_relation(entity_kind)?;
        Ok(sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE {key} BETWEEN $1 AND $2"
        ))
        .bind(first)
        .bind(last)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Closes reservations and records their watermarks in one transaction
    ///
    /// # Errors
    ///
    /// - `DatabaseError::NotFound` if a reservation is no longer open
    /// - `DatabaseError::ConstraintViolation` if a range lies outside its block
    ///   or does not hold exactly one row per identifier
    #[instrument(skip(self, commits), fields(ranges = commits.len()))]
    pub async fn commit(&self, commits: &[RangeCommitParams]) -> Result<Vec<WatermarkRow>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut watermarks = Vec::with_capacity(commits.len());

        for commit in commits {
            if commit.first_id < commit.block_first || commit.last_id > commit.block_last || commit.last_id < commit.first_id {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "range {}..={} lies outside block {}..={}",
                    commit.first_id, commit.last_id, commit.block_first, commit.block_last
                )));
            }

            let closed = sqlx::query(
                "DELETE FROM batch_reservations \
                 WHERE entity_kind = $1 AND first_id = $2 AND last_id = $3",
            )
            .bind(&commit.entity_kind)
            .bind(commit.block_first)
            .bind(commit.block_last)
            .execute(&mut *tx)
            .await?;
            if closed.rows_affected() == 0 {
                return Err(DatabaseError::not_found(
                    "BatchReservation",
                    format!("{} {}..={}", commit.entity_kind, commit.block_first, commit.block_last),
                ));
            }

            let (table, key) = staged_relation(&commit.entity_kind)?;
            let found: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {table} WHERE {key} BETWEEN $1 AND $2"
            ))
            .bind(commit.first_id)
            .bind(commit.last_id)
            .fetch_one(&mut *tx)
            .await?;
            let expected = commit.last_id - commit.first_id + 1;
            if found != expected {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "range {}..={} has {} of {} rows",
                    commit.first_id, commit.last_id, found, expected
                )));
            }

            let watermark = sqlx::query_as::<_, WatermarkRow>(&format!(
                "INSERT INTO batch_watermarks (run_id, entity_kind, first_id, last_id) \
                 VALUES ($1, $2, $3, $4) RETURNING {WATERMARK_COLUMNS}"
            ))
            .bind(commit.run_id)
            .bind(&commit.entity_kind)
            .bind(commit.first_id)
            .bind(commit.last_id)
            .fetch_one(&mut *tx)
            .await?;
            watermarks.push(watermark);
        }

        tx.commit().await?;
        Ok(watermarks)
    }

    /// Closes one reservation and deletes the rows staged in its block
    ///
    /// Returns the number of deleted rows; 0 if the reservation was already
    /// closed.
    #[instrument(skip(self))]
    pub async fn release(&self, entity_kind: &str, first_id: i64, last_id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let closed = sqlx::query(
            "DELETE FROM batch_reservations WHERE entity_kind = $1 AND first_id = $2 AND last_id = $3",
        )
        .bind(entity_kind)
        .bind(first_id)
        .bind(last_id)
        .execute(&mut *tx)
        .await?;
        if closed.rows_affected() == 0 {
            return Ok(0);
        }
        let deleted = Self::delete_block(&mut tx, entity_kind, first_id, last_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Releases every reservation opened before `reserved_before`
    #[instrument(skip(self))]
    pub async fn release_stale(&self, reserved_before: DateTime<Utc>) -> Result<Vec<ReservationRow>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let stale = sqlx::query_as::<_, ReservationRow>(
            "DELETE FROM batch_reservations WHERE reserved_at < $1 \
             RETURNING entity_kind, first_id, last_id, run_id, reserved_at",
        )
        .bind(reserved_before)
        .fetch_all(&mut *tx)
        .await?;

        for reservation in &stale {
            let deleted = Self::delete_block(
                &mut tx,
                &reservation.entity_kind,
                reservation.first_id,
                reservation.last_id,
            )
            .await?;
            info!(
                run_id = %reservation.run_id,
                entity_kind = %reservation.entity_kind,
                deleted,
                "Released stale reservation"
            );
        }

        tx.commit().await?;
        Ok(stale)
    }

    /// Committed ranges below the lowest open block that `consumer` has not
    /// completed, ordered by first id
    pub async fn pending_ranges(&self, entity_kind: &str, consumer: &str) -> Result<Vec<WatermarkRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, WatermarkRow>(
            "SELECT w.watermark_id, w.run_id, w.entity_kind, w.first_id, w.last_id, w.captured_at \
             FROM batch_watermarks w \
             WHERE w.entity_kind = $1 \
               AND w.first_id < COALESCE( \
                   (SELECT MIN(r.first_id) FROM batch_reservations r WHERE r.entity_kind = $1), \
                   9223372036854775807) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM watermark_consumption c \
                   WHERE c.watermark_id = w.watermark_id AND c.consumer = $2 \
                     AND c.completed_at IS NOT NULL) \
             ORDER BY w.first_id",
        )
        .bind(entity_kind)
        .bind(consumer)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Takes or renews a lease; `false` if completed or held by another live worker
    #[instrument(skip(self))]
    pub async fn try_lease(
        &self,
        watermark_id: i64,
        consumer: &str,
        worker: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let leased = sqlx::query_scalar::<_, i64>(
            "INSERT INTO watermark_consumption (watermark_id, consumer, worker, lease_until) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (watermark_id, consumer) DO UPDATE \
             SET worker = EXCLUDED.worker, lease_until = EXCLUDED.lease_until \
             WHERE watermark_consumption.completed_at IS NULL \
               AND (watermark_consumption.worker = EXCLUDED.worker \
                    OR watermark_consumption.lease_until < NOW()) \
             RETURNING watermark_id",
        )
        .bind(watermark_id)
        .bind(consumer)
        .bind(worker)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(leased.is_some())
    }

    #[instrument(skip(self))]
    pub async fn mark_consumed(&self, watermark_id: i64, consumer: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO watermark_consumption (watermark_id, consumer, completed_at) \
             SELECT watermark_id, $2, NOW() FROM batch_watermarks WHERE watermark_id = $1 \
             ON CONFLICT (watermark_id, consumer) DO UPDATE SET completed_at = NOW()",
        )
        .bind(watermark_id)
        .bind(consumer)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BatchWatermark", watermark_id));
        }
        Ok(())
    }

    pub async fn find_covering(&self, entity_kind: &str, id: i64) -> Result<Option<WatermarkRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, WatermarkRow>(&format!(
            "SELECT {WATERMARK_COLUMNS} FROM batch_watermarks \
             WHERE entity_kind = $1 AND $2 BETWEEN first_id AND last_id LIMIT 1"
        ))
        .bind(entity_kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_for_run(&self, run_id: Uuid, entity_kind: &str) -> Result<Option<WatermarkRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, WatermarkRow>(&format!(
            "SELECT {WATERMARK_COLUMNS} FROM batch_watermarks \
             WHERE run_id = $1 AND entity_kind = $2 LIMIT 1"
        ))
        .bind(run_id)
        .bind(entity_kind)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_block(
        tx: &mut Transaction<'_, Postgres>,
        entity_kind: &str,
        first_id: i64,
        last_id: i64,
    ) -> Result<u64, DatabaseError> {
        let (table, key) = staged_relation(entity_kind)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE {key} BETWEEN $1 AND $2"))
            .bind(first_id)
            .bind(last_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}
