//! Upload record repository

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::error::DatabaseError;

/// Row of the `upload_records` table
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub upload_id: i64,
    pub item_id: i64,
    pub item_code: String,
    pub item_type_id: i64,
    pub channel_id: i64,
    pub state: String,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub skipped_sent: bool,
}

/// Data for a new upload record
#[derive(Debug, Clone)]
pub struct NewUploadRow {
    pub item_id: i64,
    pub item_code: String,
    pub item_type_id: i64,
    pub channel_id: i64,
}

/// Columns written by a state transition
///
/// `None` timestamps and status leave the stored value untouched.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub state: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub skipped_sent: bool,
    pub status: Option<String>,
}

const UPLOAD_COLUMNS: &str = "upload_id, item_id, item_code, item_type_id, channel_id, state, status, \
    created_at, sent_at, received_at, skipped_sent";

/// Repository for upload records
#[derive(Debug, Clone)]
pub struct UploadRepository {
    pool: PgPool,
}

impl UploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, upload), fields(item_code = %upload.item_code))]
    pub async fn insert(&self, upload: &NewUploadRow) -> Result<UploadRow, DatabaseError> {
        Ok(sqlx::query_as::<_, UploadRow>(&format!(
            "INSERT INTO upload_records (item_id, item_code, item_type_id, channel_id) \
             VALUES ($1, $2, $3, $4) RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(upload.item_id)
        .bind(&upload.item_code)
        .bind(upload.item_type_id)
        .bind(upload.channel_id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn get(&self, upload_id: i64) -> Result<Option<UploadRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM upload_records WHERE upload_id = $1"
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Applies `update` only while the stored state equals `expected`
    ///
    /// Returns `None` when the state has moved on.
    ///
    /// # Errors
    ///
    /// `DatabaseError::NotFound` if no record has this id
    #[instrument(skip(self, update), fields(to = %update.state))]
    pub async fn compare_and_set(
        &self,
        upload_id: i64,
        expected: &str,
        update: &StateUpdate,
    ) -> Result<Option<UploadRow>, DatabaseError> {
        let updated = sqlx::query_as::<_, UploadRow>(&format!(
            "UPDATE upload_records SET \
                 state = $3, \
                 sent_at = COALESCE($4, sent_at), \
                 received_at = COALESCE($5, received_at), \
                 skipped_sent = skipped_sent OR $6, \
                 status = COALESCE($7, status) \
             WHERE upload_id = $1 AND state = $2 \
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(upload_id)
        .bind(expected)
        .bind(&update.state)
        .bind(update.sent_at)
        .bind(update.received_at)
        .bind(update.skipped_sent)
        .bind(&update.status)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(updated);
        }
        match self.get(upload_id).await? {
            Some(_) => Ok(None),
            None => Err(DatabaseError::not_found("UploadRecord", upload_id)),
        }
    }

    pub async fn list_by_state(&self, state: &str, limit: i64) -> Result<Vec<UploadRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM upload_records WHERE state = $1 ORDER BY upload_id LIMIT $2"
        ))
        .bind(state)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_for_item(&self, item_type_id: i64, item_id: i64) -> Result<Vec<UploadRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM upload_records \
             WHERE item_type_id = $1 AND item_id = $2 ORDER BY upload_id"
        ))
        .bind(item_type_id)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
