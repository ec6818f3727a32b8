//! Claim intake staging
//!
//! An [`IntakeBatch`] is one ingestion run. It holds an identifier block for
//! claims and one for service lines, both under the same run id. Every
//! envelope ingested into the batch takes the next identifiers from those
//! blocks, and claim plus lines are written in a single call to the staging
//! store. Committing the batch records one watermark per entity kind.
//!
//! Row-level rejections (bad envelope, unknown or inactive channel, duplicate)
//! leave the batch usable and consume no identifiers. A storage failure
//! poisons the batch: it can no longer ingest or commit and must be aborted,
//! which discards everything it staged.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use core_kernel::{BatchRunId, ServiceLineId, StagedClaimId};
use domain_registry::{ChannelRegistry, ChannelResolution};

use crate::claim::{ClaimRef, StagedClaim, StagedClaimService, StagingStatus};
use crate::envelope::ClaimEnvelope;
use crate::error::IntakeError;
use crate::ports::StagingPort;
use crate::watermark::{BatchHandle, BatchWatermark, EntityKind, WatermarkTracker};

/// Identifier block sizes reserved per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeConfig {
    pub claim_capacity: u64,
    pub service_capacity: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            claim_capacity: 500,
            service_capacity: 5_000,
        }
    }
}

/// An open ingestion run
#[derive(Debug)]
pub struct IntakeBatch {
    run_id: BatchRunId,
    claims: BatchHandle,
    services: BatchHandle,
    poisoned: RwLock<Option<String>>,
}

impl IntakeBatch {
    pub fn run_id(&self) -> BatchRunId {
        self.run_id
    }

    pub fn claims(&self) -> &BatchHandle {
        &self.claims
    }

    pub fn services(&self) -> &BatchHandle {
        &self.services
    }

    pub async fn is_poisoned(&self) -> bool {
        self.poisoned.read().await.is_some()
    }

    async fn ensure_usable(&self) -> Result<(), IntakeError> {
        match self.poisoned.read().await.as_ref() {
            Some(reason) => Err(IntakeError::BatchPoisoned(reason.clone())),
            None => Ok(()),
        }
    }

    async fn poison(&self, reason: String) {
        warn!(run_id = %self.run_id, reason = %reason, "Batch poisoned");
        *self.poisoned.write().await = Some(reason);
    }
}

/// Watermarks recorded for a committed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub run_id: BatchRunId,
    pub claims: Option<BatchWatermark>,
    pub services: Option<BatchWatermark>,
}

impl CommittedBatch {
    pub fn claim_count(&self) -> u64 {
        self.claims.as_ref().map_or(0, BatchWatermark::len)
    }

    pub fn service_count(&self) -> u64 {
        self.services.as_ref().map_or(0, BatchWatermark::len)
    }
}

/// Stages claim envelopes from external channels
#[derive(Clone)]
pub struct IntakeService {
    channels: ChannelRegistry,
    staging: Arc<dyn StagingPort>,
    tracker: WatermarkTracker,
    config: IntakeConfig,
}

impl IntakeService {
    pub fn new(
        channels: ChannelRegistry,
        staging: Arc<dyn StagingPort>,
        tracker: WatermarkTracker,
        config: IntakeConfig,
    ) -> Self {
        Self {
            channels,
            staging,
            tracker,
            config,
        }
    }

    /// Opens a new ingestion run
    pub async fn begin(&self) -> Result<IntakeBatch, IntakeError> {
        let run_id = BatchRunId::new();
        let claims = self
            .tracker
            .begin_batch_for_run(run_id, EntityKind::StagedClaim, self.config.claim_capacity)
            .await?;
        let services = match self
            .tracker
            .begin_batch_for_run(run_id, EntityKind::StagedClaimService, self.config.service_capacity)
            .await
        {
            Ok(services) => services,
            Err(e) => {
                self.tracker.abort_batch(&claims).await?;
                return Err(e.into());
            }
        };
        debug!(run_id = %run_id, "Opened ingestion run");
        Ok(IntakeBatch {
            run_id,
            claims,
            services,
            poisoned: RwLock::new(None),
        })
    }

    /// Stages one claim envelope with its service lines
    ///
    /// # Errors
    ///
    /// - `IntakeError::InvalidEnvelope` if required fields are missing or out of range
    /// - `IntakeError::UnknownChannel` / `InactiveChannel` if the channel cannot submit
    /// - `IntakeError::DuplicateExternalClaim` if the claim is already staged
    /// - `IntakeError::BatchCapacityExhausted` if the run has no identifiers left
    /// - `IntakeError::BatchPoisoned` if an earlier storage failure broke the run
    #[instrument(skip(self, batch, envelope), fields(
        run_id = %batch.run_id,
        channel_id = %envelope.channel_id,
        external_claim_id = %envelope.external_claim_id.trim()
    ))]
    pub async fn ingest(
        &self,
        batch: &IntakeBatch,
        envelope: ClaimEnvelope,
    ) -> Result<StagedClaimId, IntakeError> {
        batch.ensure_usable().await?;
        envelope.validate()?;

        match self.channels.resolve(envelope.channel_id).await? {
            ChannelResolution::Active(_) => {}
            ChannelResolution::Inactive(channel) => {
                warn!(channel = %channel.name, "Rejected claim from inactive channel");
                return Err(IntakeError::InactiveChannel(channel.id));
            }
            ChannelResolution::Unknown(id) => {
                warn!("Rejected claim from unknown channel");
                return Err(IntakeError::UnknownChannel(id));
            }
        }

        let own_ref = envelope.claim_ref();
        if let Some(existing) = self.staging.find_claim_by_ref(&own_ref).await? {
            return Err(duplicate(&own_ref, existing.id));
        }

        let mut parents = Vec::with_capacity(envelope.service_lines.len());
        for line in &envelope.service_lines {
            let claim_ref = envelope.line_parent(line);
            let parent = if claim_ref == own_ref {
                None
            } else {
                self.staging.find_claim_by_ref(&claim_ref).await?.map(|c| c.id)
            };
            parents.push((claim_ref, parent));
        }

        let mut claim_cursor = batch.claims.cursor().await?;
        let mut service_cursor = batch.services.cursor().await?;

        let claim_id = claim_cursor
            .peek(1)
            .map(|block| StagedClaimId::new(block.first()))
            .ok_or(IntakeError::BatchCapacityExhausted {
                kind: EntityKind::StagedClaim,
                needed: 1,
                remaining: claim_cursor.remaining(),
            })?;
        let line_count = envelope.service_lines.len() as u64;
        let first_line_id = if line_count == 0 {
            0
        } else {
            service_cursor
                .peek(line_count)
                .map(|block| block.first())
                .ok_or(IntakeError::BatchCapacityExhausted {
                    kind: EntityKind::StagedClaimService,
                    needed: line_count,
                    remaining: service_cursor.remaining(),
                })?
        };

        let now = Utc::now();
        let services: Vec<StagedClaimService> = envelope
            .service_lines
            .iter()
            .zip(parents)
            .enumerate()
            .map(|(index, (line, (claim_ref, parent)))| StagedClaimService {
                id: ServiceLineId::new(first_line_id + index as i64),
                run_id: batch.run_id,
                parent_id: if claim_ref == own_ref { Some(claim_id) } else { parent },
                claim_ref,
                line_number: index as i32 + 1,
                service_code: line.service_code.trim().to_string(),
                quantity: line.quantity,
                amount: line.amount,
                diagnosis_code: line.diagnosis_code.clone(),
                picked: false,
                status: StagingStatus::Pending,
                quarantine_reason: None,
                inserted_at: now,
            })
            .collect();
        let claim = StagedClaim {
            id: claim_id,
            run_id: batch.run_id,
            external_claim_id: own_ref.external_claim_id.clone(),
            channel_id: envelope.channel_id,
            scheme_code: envelope.scheme_code.trim().to_string(),
            provider_code: envelope.provider_code.trim().to_string(),
            member_number: envelope.member_number.trim().to_string(),
            benefit_id: envelope.benefit_id.trim().to_string(),
            amount: envelope.amount,
            invoice_date: envelope.invoice_date,
            status: StagingStatus::Pending,
            quarantine_reason: None,
            processed: false,
            inserted_at: now,
        };

        match self.staging.insert_claim(claim, services).await {
            Ok(()) => {
                claim_cursor.advance(1);
                service_cursor.advance(line_count);
                debug!(staged_claim_id = %claim_id, service_lines = line_count, "Staged claim");
                Ok(claim_id)
            }
            Err(e) if e.is_conflict() => {
                // A concurrent run may have staged the same claim since the lookup
                if let Some(existing) = self.staging.find_claim_by_ref(&own_ref).await? {
                    return Err(duplicate(&own_ref, existing.id));
                }
                batch.poison(e.to_string()).await;
                Err(e.into())
            }
            Err(e) => {
                batch.poison(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Commits the run, recording a watermark for each kind it staged
    pub async fn commit(&self, batch: &IntakeBatch) -> Result<CommittedBatch, IntakeError> {
        batch.ensure_usable().await?;
        let watermarks = self
            .tracker
            .commit_assigned(&[&batch.claims, &batch.services])
            .await?;

        let mut committed = CommittedBatch {
            run_id: batch.run_id,
            claims: None,
            services: None,
        };
        for watermark in watermarks {
            match watermark.kind {
                EntityKind::StagedClaim => committed.claims = Some(watermark),
                EntityKind::StagedClaimService => committed.services = Some(watermark),
            }
        }
        info!(
            run_id = %batch.run_id,
            claims = committed.claim_count(),
            service_lines = committed.service_count(),
            "Committed ingestion run"
        );
        Ok(committed)
    }

    /// Abandons the run and discards everything it staged
    pub async fn abort(&self, batch: &IntakeBatch) -> Result<u64, IntakeError> {
        let claims = self.tracker.abort_batch(&batch.claims).await?;
        let services = self.tracker.abort_batch(&batch.services).await?;
        Ok(claims + services)
    }

    /// Stages envelopes as one run and commits it
    ///
    /// Row-level rejections are returned alongside the committed run. A
    /// structural failure aborts the run and is returned as the error.
    pub async fn ingest_all(
        &self,
        envelopes: Vec<ClaimEnvelope>,
    ) -> Result<(CommittedBatch, Vec<(ClaimRef, IntakeError)>), IntakeError> {
        let batch = self.begin().await?;
        let mut rejected = Vec::new();
        for envelope in envelopes {
            let claim_ref = envelope.claim_ref();
            match self.ingest(&batch, envelope).await {
                Ok(_) => {}
                Err(e) if e.is_row_scoped() => {
                    info!(claim = %claim_ref, error = %e, "Envelope rejected");
                    rejected.push((claim_ref, e));
                }
                Err(e) => {
                    self.abort_after_failure(&batch, &e).await;
                    return Err(e);
                }
            }
        }
        match self.commit(&batch).await {
            Ok(committed) => Ok((committed, rejected)),
            Err(e) => {
                self.abort_after_failure(&batch, &e).await;
                Err(e)
            }
        }
    }

    /// Aborts a failed run; an abort failure is logged so the caller still
    /// sees the error that broke the run
    ///
    /// A run that cannot be aborted keeps its reservations until
    /// `WatermarkTracker::abandon_stale` releases them.
    async fn abort_after_failure(&self, batch: &IntakeBatch, cause: &IntakeError) {
        if let Err(abort_error) = self.abort(batch).await {
            error!(
                run_id = %batch.run_id,
                cause = %cause,
                error = %abort_error,
                "Failed to abort ingestion run"
            );
        }
    }
}

fn duplicate(claim_ref: &ClaimRef, existing: StagedClaimId) -> IntakeError {
    info!(claim = %claim_ref, existing = %existing, "Duplicate claim submission");
    IntakeError::DuplicateExternalClaim {
        channel_id: claim_ref.channel_id,
        external_claim_id: claim_ref.external_claim_id.clone(),
        existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ServiceLineInput;
    use crate::ports::mock::MockStagingStore;
    use chrono::NaiveDate;
    use core_kernel::ChannelId;
    use domain_registry::{MockRegistryPort, NewChannel};
    use rust_decimal_macros::dec;

    struct Harness {
        intake: IntakeService,
        store: MockStagingStore,
        channels: ChannelRegistry,
    }

    fn harness(config: IntakeConfig) -> Harness {
        let store = MockStagingStore::new();
        let channels = ChannelRegistry::new(Arc::new(MockRegistryPort::new()));
        let intake = IntakeService::new(
            channels.clone(),
            Arc::new(store.clone()),
            WatermarkTracker::new(Arc::new(store.clone())),
            config,
        );
        Harness { intake, store, channels }
    }

    fn envelope(channel_id: ChannelId, external: &str, lines: usize) -> ClaimEnvelope {
        ClaimEnvelope {
            channel_id,
            external_claim_id: external.to_string(),
            scheme_code: "SCH-01".to_string(),
            provider_code: "PRV-01".to_string(),
            member_number: "MEM-01".to_string(),
            benefit_id: "OUTPATIENT".to_string(),
            amount: dec!(250.00),
            invoice_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            service_lines: (0..lines)
                .map(|_| ServiceLineInput {
                    claim_external_id: None,
                    service_code: "LAB".to_string(),
                    quantity: dec!(1),
                    amount: dec!(50.00),
                    diagnosis_code: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_ingest_assigns_contiguous_ids() {
        let h = harness(IntakeConfig::default());
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = h.intake.begin().await.unwrap();

        let a = h.intake.ingest(&batch, envelope(channel.id, "CLM-A", 2)).await.unwrap();
        let b = h.intake.ingest(&batch, envelope(channel.id, "CLM-B", 1)).await.unwrap();
        assert_eq!(b.value(), a.value() + 1);

        let services = h.store.all_services().await;
        assert_eq!(services.len(), 3);
        assert!(services.iter().take(2).all(|s| s.parent_id == Some(a)));
        assert_eq!(services[2].parent_id, Some(b));
        assert_eq!(services[1].line_number, 2);
    }

    #[tokio::test]
    async fn test_rejections_consume_no_ids() {
        let h = harness(IntakeConfig::default());
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = h.intake.begin().await.unwrap();

        let mut bad = envelope(channel.id, "CLM-BAD", 0);
        bad.amount = dec!(0);
        assert!(matches!(
            h.intake.ingest(&batch, bad).await,
            Err(IntakeError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            h.intake.ingest(&batch, envelope(ChannelId::new(77), "CLM-X", 0)).await,
            Err(IntakeError::UnknownChannel(_))
        ));
        assert_eq!(batch.claims().assigned_range().await, None);

        let first = h.intake.ingest(&batch, envelope(channel.id, "CLM-1", 0)).await.unwrap();
        assert_eq!(first.value(), batch.claims().reservation().block.first());
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_is_row_scoped() {
        let h = harness(IntakeConfig { claim_capacity: 1, service_capacity: 1 });
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = h.intake.begin().await.unwrap();

        let err = h.intake.ingest(&batch, envelope(channel.id, "CLM-1", 2)).await.unwrap_err();
        assert!(matches!(err, IntakeError::BatchCapacityExhausted { kind: EntityKind::StagedClaimService, .. }));

        h.intake.ingest(&batch, envelope(channel.id, "CLM-1", 1)).await.unwrap();
        let err = h.intake.ingest(&batch, envelope(channel.id, "CLM-2", 0)).await.unwrap_err();
        assert!(err.is_row_scoped());

        let committed = h.intake.commit(&batch).await.unwrap();
        assert_eq!(committed.claim_count(), 1);
        assert_eq!(committed.service_count(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_rows() {
        let h = harness(IntakeConfig::default());
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = h.intake.begin().await.unwrap();
        h.intake.ingest(&batch, envelope(channel.id, "CLM-1", 2)).await.unwrap();

        assert_eq!(h.intake.abort(&batch).await.unwrap(), 3);
        assert!(h.store.all_claims().await.is_empty());
        assert!(h.store.open_reservations().await.is_empty());

        // The claim can be submitted again in a fresh run
        let retry = h.intake.begin().await.unwrap();
        h.intake.ingest(&retry, envelope(channel.id, "CLM-1", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_without_lines_records_claims_only() {
        let h = harness(IntakeConfig::default());
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = h.intake.begin().await.unwrap();
        h.intake.ingest(&batch, envelope(channel.id, "CLM-1", 0)).await.unwrap();

        let committed = h.intake.commit(&batch).await.unwrap();
        assert!(committed.claims.is_some());
        assert!(committed.services.is_none());
        assert!(h.store.open_reservations().await.is_empty());
        assert!(h.intake.ingest(&batch, envelope(channel.id, "CLM-2", 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_all_reports_rejections() {
        let h = harness(IntakeConfig::default());
        let channel = h.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let (committed, rejected) = h
            .intake
            .ingest_all(vec![
                envelope(channel.id, "CLM-1", 1),
                envelope(channel.id, "CLM-1", 1),
                envelope(channel.id, "CLM-2", 0),
            ])
            .await
            .unwrap();

        assert_eq!(committed.claim_count(), 2);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].1.is_duplicate());
    }
}
