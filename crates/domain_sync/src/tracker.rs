//! Upload tracker service

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use core_kernel::{ItemTypeId, UploadId};
use domain_registry::{ChannelRegistry, ChannelResolution, ItemTypeRegistry};

use crate::error::SyncError;
use crate::ports::UploadPort;
use crate::upload::{AckOutcome, Acknowledgment, NewUpload, Transition, UploadRecord, UploadState};

/// Records delivery state of propagated entities
#[derive(Clone)]
pub struct UploadTracker {
    uploads: Arc<dyn UploadPort>,
    item_types: ItemTypeRegistry,
    channels: ChannelRegistry,
}

impl UploadTracker {
    pub fn new(
        uploads: Arc<dyn UploadPort>,
        item_types: ItemTypeRegistry,
        channels: ChannelRegistry,
    ) -> Self {
        Self {
            uploads,
            item_types,
            channels,
        }
    }

    /// Starts tracking a propagation in `NotSent`
    ///
    /// # Errors
    ///
    /// - `SyncError::UnknownItemType` if the item type is missing or inactive
    /// - `SyncError::UnknownChannel` if the channel is not registered
    #[instrument(skip(self, upload), fields(item_code = %upload.item_code, channel_id = %upload.channel_id))]
    pub async fn enqueue(&self, upload: NewUpload) -> Result<UploadRecord, SyncError> {
        upload.validate()?;
        let item_type = self.item_types.resolve_active(upload.item_type).await?;
        if let ChannelResolution::Unknown(id) = self.channels.resolve(upload.channel_id).await? {
            return Err(SyncError::UnknownChannel(id));
        }

        let record = self.uploads.insert(upload).await?;
        info!(upload_id = %record.id, item_type = %item_type.name, "Upload enqueued");
        Ok(record)
    }

    /// Records that the item was sent
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidTransition` if the record already left `NotSent`
    pub async fn mark_sent(&self, id: UploadId) -> Result<UploadRecord, SyncError> {
        let (record, _) = self.transition(id, UploadState::Sent, Utc::now(), None).await?;
        Ok(record)
    }

    /// Records that the external system received the item
    ///
    /// From `NotSent` this passes through `Sent` implicitly and sets
    /// `skipped_sent`.
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidTransition` if the record is already `Received`
    pub async fn mark_received(&self, id: UploadId) -> Result<UploadRecord, SyncError> {
        let (record, _) = self.transition(id, UploadState::Received, Utc::now(), None).await?;
        Ok(record)
    }

    /// Applies an external acknowledgment
    ///
    /// Row-level problems are reported in the outcome; only storage failures
    /// are returned as errors.
    #[instrument(skip(self, ack), fields(upload_id = %ack.upload_id, kind = ?ack.kind))]
    pub async fn acknowledge(&self, ack: Acknowledgment) -> Result<AckOutcome, SyncError> {
        let target = ack.kind.target();
        match self.transition(ack.upload_id, target, ack.at, ack.detail).await {
            Ok((record, transition)) => Ok(AckOutcome::Applied {
                record,
                from: transition.from,
            }),
            Err(SyncError::InvalidTransition { upload_id, .. }) => {
                let record = self
                    .uploads
                    .get(upload_id)
                    .await?
                    .ok_or(SyncError::UnknownUpload(upload_id))?;
                Ok(AckOutcome::Rejected { record, requested: target })
            }
            Err(SyncError::UnknownUpload(id)) => Ok(AckOutcome::UnknownTarget(id)),
            Err(e) => Err(e),
        }
    }

    /// Records in `state`, oldest first, for (re)sending or reconciliation
    pub async fn pending(&self, state: UploadState, limit: u32) -> Result<Vec<UploadRecord>, SyncError> {
        Ok(self.uploads.list_by_state(state, limit).await?)
    }

    /// Every propagation of one entity
    pub async fn history(&self, item_type: ItemTypeId, item_id: i64) -> Result<Vec<UploadRecord>, SyncError> {
        Ok(self.uploads.list_for_item(item_type, item_id).await?)
    }

    /// Moves a record forward with compare-and-set
    ///
    /// A lost race re-reads the record and plans again; state only moves
    /// forward, so this settles after at most two retries.
    async fn transition(
        &self,
        id: UploadId,
        target: UploadState,
        at: DateTime<Utc>,
        status: Option<String>,
    ) -> Result<(UploadRecord, Transition), SyncError> {
        loop {
            let current = match self.uploads.get(id).await? {
                Some(record) => record,
                None => {
                    warn!(upload_id = %id, requested = %target, "Acknowledgment for unknown upload ignored");
                    return Err(SyncError::UnknownUpload(id));
                }
            };

            let transition = match current.state.plan(id, target) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!(upload_id = %id, current = %current.state, requested = %target, "Rejected upload transition");
                    return Err(e);
                }
            };

            let change = transition.change(at, status.clone());
            match self.uploads.compare_and_set(id, transition.from, change).await {
                Ok(Some(record)) => {
                    info!(
                        upload_id = %id,
                        from = %transition.from,
                        to = %transition.to,
                        skipped_sent = transition.skipped_sent,
                        "Upload state advanced"
                    );
                    return Ok((record, transition));
                }
                Ok(None) => continue,
                Err(e) if e.is_not_found() => return Err(SyncError::UnknownUpload(id)),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MockUploadPort;
    use crate::upload::AckKind;
    use core_kernel::ChannelId;
    use domain_registry::{MockRegistryPort, NewChannel, StandardItemType};

    struct Harness {
        tracker: UploadTracker,
        uploads: MockUploadPort,
        item_types: ItemTypeRegistry,
        channel_id: ChannelId,
        members: ItemTypeId,
    }

    async fn harness() -> Harness {
        let registry = Arc::new(MockRegistryPort::new());
        let channels = ChannelRegistry::new(registry.clone());
        let item_types = ItemTypeRegistry::new(registry);
        let channel = channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap();
        let seeded = item_types.seed_standard().await.unwrap();
        let members = seeded
            .iter()
            .find(|t| t.name == StandardItemType::Members.name())
            .unwrap()
            .id;
        let uploads = MockUploadPort::new();
        Harness {
            tracker: UploadTracker::new(Arc::new(uploads.clone()), item_types.clone(), channels),
            uploads,
            item_types,
            channel_id: channel.id,
            members,
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_send_then_receive() {
        let h = harness().await;
        let record = h
            .tracker
            .enqueue(NewUpload::new(10, "MEM-10", h.members, h.channel_id))
            .await
            .unwrap();
        assert_eq!(record.state, UploadState::NotSent);

        let sent = h.tracker.mark_sent(record.id).await.unwrap();
        assert_eq!(sent.state, UploadState::Sent);
        assert!(sent.sent_at.is_some());

        let received = h.tracker.mark_received(record.id).await.unwrap();
        assert_eq!(received.state, UploadState::Received);
        assert!(!received.skipped_sent);
        assert_eq!(received.sent_at, sent.sent_at);
    }

    #[tokio::test]
    async fn test_mark_sent_twice_rejected() {
        let h = harness().await;
        let record = h
            .tracker
            .enqueue(NewUpload::new(10, "MEM-10", h.members, h.channel_id))
            .await
            .unwrap();
        h.tracker.mark_sent(record.id).await.unwrap();

        let err = h.tracker.mark_sent(record.id).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { from: UploadState::Sent, .. }));
        assert_eq!(h.uploads.get(record.id).await.unwrap().unwrap().state, UploadState::Sent);
    }

    #[tokio::test]
    async fn test_enqueue_requires_active_item_type() {
        let h = harness().await;
        h.item_types.set_active(h.members, false).await.unwrap();

        let err = h
            .tracker
            .enqueue(NewUpload::new(10, "MEM-10", h.members, h.channel_id))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownItemType(_)));
        assert_eq!(h.uploads.count().await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_requires_registered_channel() {
        let h = harness().await;
        let err = h
            .tracker
            .enqueue(NewUpload::new(10, "MEM-10", h.members, ChannelId::new(404)))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn test_ack_for_unknown_upload_creates_nothing() {
        let h = harness().await;
        let outcome = h
            .tracker
            .acknowledge(Acknowledgment {
                upload_id: UploadId::new(999),
                kind: AckKind::Received,
                at: Utc::now(),
                detail: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::UnknownTarget(UploadId::new(999)));
        assert_eq!(h.uploads.count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_ack_is_rejected_outcome() {
        let h = harness().await;
        let record = h
            .tracker
            .enqueue(NewUpload::new(10, "MEM-10", h.members, h.channel_id))
            .await
            .unwrap();
        let ack = Acknowledgment {
            upload_id: record.id,
            kind: AckKind::Sent,
            at: Utc::now(),
            detail: Some("accepted by partner".to_string()),
        };

        let first = h.tracker.acknowledge(ack.clone()).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(first.record().unwrap().status.as_deref(), Some("accepted by partner"));

        let second = h.tracker.acknowledge(ack).await.unwrap();
        assert!(matches!(second, AckOutcome::Rejected { requested: UploadState::Sent, .. }));
    }
}
