//! PostgreSQL upload adapter

use async_trait::async_trait;
use sqlx::PgPool;

use core_kernel::{ChannelId, DomainPort, HealthCheckResult, HealthCheckable, ItemTypeId, PortError, UploadId};
use domain_sync::{NewUpload, StateChange, UploadPort, UploadRecord, UploadState};

use crate::error::DatabaseError;
use crate::repositories::upload::{NewUploadRow, StateUpdate, UploadRepository, UploadRow};

/// Implements `UploadPort` over `upload_records`
///
/// The compare-and-set is a single conditional `UPDATE`, so two workers
/// acknowledging the same record cannot both apply a transition.
#[derive(Debug, Clone)]
pub struct PostgresUploadAdapter {
    repository: UploadRepository,
    pool: PgPool,
}

impl PostgresUploadAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: UploadRepository::new(pool.clone()),
            pool,
        }
    }
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = DatabaseError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        Ok(UploadRecord {
            id: UploadId::new(row.upload_id),
            item_id: row.item_id,
            item_code: row.item_code,
            item_type: ItemTypeId::new(row.item_type_id),
            channel_id: ChannelId::new(row.channel_id),
            state: row.state.parse().map_err(|e| DatabaseError::decode("state", e))?,
            created_at: row.created_at,
            status: row.status,
            sent_at: row.sent_at,
            received_at: row.received_at,
            skipped_sent: row.skipped_sent,
        })
    }
}

impl From<&StateChange> for StateUpdate {
    fn from(change: &StateChange) -> Self {
        StateUpdate {
            state: change.to.as_str().to_string(),
            sent_at: change.sent_at,
            received_at: change.received_at,
            skipped_sent: change.skipped_sent,
            status: change.status.clone(),
        }
    }
}

fn decode_all(rows: Vec<UploadRow>) -> Result<Vec<UploadRecord>, PortError> {
    rows.into_iter()
        .map(|row| UploadRecord::try_from(row).map_err(PortError::from))
        .collect()
}

impl DomainPort for PostgresUploadAdapter {}

#[async_trait]
impl HealthCheckable for PostgresUploadAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        super::probe(&self.pool, "postgres-upload-adapter").await
    }
}

#[async_trait]
impl UploadPort for PostgresUploadAdapter {
    async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, PortError> {
        let row = self
            .repository
            .insert(&NewUploadRow {
                item_id: upload.item_id,
                item_code: upload.item_code,
                item_type_id: upload.item_type.value(),
                channel_id: upload.channel_id.value(),
            })
            .await?;
        Ok(UploadRecord::try_from(row)?)
    }

    async fn get(&self, id: UploadId) -> Result<Option<UploadRecord>, PortError> {
        self.repository
            .get(id.value())
            .await?
            .map(UploadRecord::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn compare_and_set(
        &self,
        id: UploadId,
        expected: UploadState,
        change: StateChange,
    ) -> Result<Option<UploadRecord>, PortError> {
        let updated = match self
            .repository
            .compare_and_set(id.value(), expected.as_str(), &StateUpdate::from(&change))
            .await
        {
            Err(DatabaseError::NotFound(_)) => return Err(PortError::not_found("UploadRecord", id)),
            other => other?,
        };
        updated
            .map(UploadRecord::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn list_by_state(&self, state: UploadState, limit: u32) -> Result<Vec<UploadRecord>, PortError> {
        decode_all(self.repository.list_by_state(state.as_str(), i64::from(limit)).await?)
    }

    async fn list_for_item(&self, item_type: ItemTypeId, item_id: i64) -> Result<Vec<UploadRecord>, PortError> {
        decode_all(self.repository.list_for_item(item_type.value(), item_id).await?)
    }
}
