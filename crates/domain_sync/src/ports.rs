//! Sync Domain Ports

use async_trait::async_trait;

use core_kernel::{DomainPort, HealthCheckable, ItemTypeId, PortError, UploadId};

use crate::upload::{NewUpload, StateChange, UploadRecord, UploadState};

/// Storage operations for upload records
///
/// Records are never deleted. The only update is a compare-and-set on the
/// state column.
#[async_trait]
pub trait UploadPort: DomainPort + HealthCheckable {
    /// Inserts a record in `NotSent`
    async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, PortError>;

    async fn get(&self, id: UploadId) -> Result<Option<UploadRecord>, PortError>;

    /// Applies `change` only if the stored state still equals `expected`
    ///
    /// Returns the updated record, or `None` when the state had moved on.
    ///
    /// # Errors
    ///
    /// `PortError::NotFound` if the record does not exist
    async fn compare_and_set(
        &self,
        id: UploadId,
        expected: UploadState,
        change: StateChange,
    ) -> Result<Option<UploadRecord>, PortError>;

    /// Records in a state, oldest first
    async fn list_by_state(&self, state: UploadState, limit: u32) -> Result<Vec<UploadRecord>, PortError>;

    /// Every record for one propagated entity, oldest first
    async fn list_for_item(&self, item_type: ItemTypeId, item_id: i64) -> Result<Vec<UploadRecord>, PortError>;
}

/// Mock implementation of the upload port for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use chrono::Utc;
    use tokio::sync::RwLock;

    use core_kernel::{AtomicIdAllocator, HealthCheckResult, IdAllocator};

    #[derive(Debug, Default, Clone)]
    pub struct MockUploadPort {
        records: Arc<RwLock<BTreeMap<UploadId, UploadRecord>>>,
        ids: Arc<AtomicIdAllocator>,
    }

    impl MockUploadPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn count(&self) -> usize {
            self.records.read().await.len()
        }
    }

    impl DomainPort for MockUploadPort {}

    #[async_trait]
    impl HealthCheckable for MockUploadPort {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("mock-upload-port")
        }
    }

    #[async_trait]
    impl UploadPort for MockUploadPort {
        async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, PortError> {
            let id = self
                .ids
                .reserve(1)
                .map_err(|e| PortError::internal(e.to_string()))?
                .first();
            let record = UploadRecord {
                id: UploadId::new(id),
                item_id: upload.item_id,
                item_code: upload.item_code,
                item_type: upload.item_type,
                channel_id: upload.channel_id,
                state: UploadState::NotSent,
                created_at: Utc::now(),
                status: None,
                sent_at: None,
                received_at: None,
                skipped_sent: false,
            };
            self.records.write().await.insert(record.id, record.clone());
            Ok(record)
        }

        async fn get(&self, id: UploadId) -> Result<Option<UploadRecord>, PortError> {
            Ok(self.records.read().await.get(&id).cloned())
        }

        async fn compare_and_set(
            &self,
            id: UploadId,
            expected: UploadState,
            change: StateChange,
        ) -> Result<Option<UploadRecord>, PortError> {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("UploadRecord", id))?;
            if record.state != expected {
                return Ok(None);
            }
            record.apply(&change);
            Ok(Some(record.clone()))
        }

        async fn list_by_state(&self, state: UploadState, limit: u32) -> Result<Vec<UploadRecord>, PortError> {
            Ok(self
                .records
                .read()
                .await
                .values()
                .filter(|r| r.state == state)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn list_for_item(&self, item_type: ItemTypeId, item_id: i64) -> Result<Vec<UploadRecord>, PortError> {
            Ok(self
                .records
                .read()
                .await
                .values()
                .filter(|r| r.item_type == item_type && r.item_id == item_id)
                .cloned()
                .collect())
        }
    }
}
