//! Pipeline wiring
//!
//! Builds the intake service, watermark tracker, validator and upload tracker
//! from one set of ports. Production uses the PostgreSQL adapters; tests pass
//! the in-memory ports instead.

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{BatchRunId, HealthCheckResult};
use domain_intake::{
    ClaimEnvelope, ClaimRef, IntakeConfig, IntakeService, PromotionPort, StagingPort, ValidationWorker,
    Validator, WatermarkPort, WatermarkTracker, WorkerIdentity,
};
use domain_registry::{ChannelPort, ChannelRegistry, ItemType, ItemTypePort, ItemTypeRegistry};
use domain_sync::{AckOutcome, Acknowledgment, UploadPort, UploadTracker};
use infra_db::{PostgresIntakeAdapter, PostgresRegistryAdapter, PostgresUploadAdapter};

use crate::error::WorkerError;

/// Storage and handoff ports used by the pipeline
#[derive(Clone)]
pub struct PipelinePorts {
    pub channels: Arc<dyn ChannelPort>,
    pub item_types: Arc<dyn ItemTypePort>,
    pub staging: Arc<dyn StagingPort>,
    pub watermarks: Arc<dyn WatermarkPort>,
    pub uploads: Arc<dyn UploadPort>,
    pub promotion: Arc<dyn PromotionPort>,
}

impl PipelinePorts {
    /// PostgreSQL adapters over one pool
    pub fn postgres(pool: PgPool, promotion: Arc<dyn PromotionPort>) -> Self {
        let registry = Arc::new(PostgresRegistryAdapter::new(pool.clone()));
        let intake = Arc::new(PostgresIntakeAdapter::new(pool.clone()));
        Self {
            channels: registry.clone(),
            item_types: registry,
            staging: intake.clone(),
            watermarks: intake,
            uploads: Arc::new(PostgresUploadAdapter::new(pool)),
            promotion,
        }
    }
}

/// Result of ingesting one file of envelopes
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: BatchRunId,
    pub claims: u64,
    pub services: u64,
    pub rejected: Vec<RejectedEnvelope>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedEnvelope {
    pub claim: ClaimRef,
    pub reason: String,
}

/// Every pipeline stage, wired to one set of ports
pub struct Pipeline {
    ports: PipelinePorts,
    pub channels: ChannelRegistry,
    pub item_types: ItemTypeRegistry,
    pub intake: IntakeService,
    pub watermarks: WatermarkTracker,
    pub worker: ValidationWorker,
    pub uploads: UploadTracker,
}

impl Pipeline {
    pub fn new(ports: PipelinePorts, intake: IntakeConfig, identity: WorkerIdentity) -> Self {
        let channels = ChannelRegistry::new(ports.channels.clone());
        let item_types = ItemTypeRegistry::new(ports.item_types.clone());
        let watermarks = WatermarkTracker::new(ports.watermarks.clone());
        let validator = Validator::new(
            channels.clone(),
            ports.staging.clone(),
            watermarks.clone(),
            ports.promotion.clone(),
        );
        Self {
            intake: IntakeService::new(channels.clone(), ports.staging.clone(), watermarks.clone(), intake),
            worker: ValidationWorker::new(validator, watermarks.clone(), identity),
            uploads: UploadTracker::new(ports.uploads.clone(), item_types.clone(), channels.clone()),
            channels,
            item_types,
            watermarks,
            ports,
        }
    }

    pub fn ports(&self) -> &PipelinePorts {
        &self.ports
    }

    /// Ensures every standard item type is registered
    pub async fn seed_item_types(&self) -> Result<Vec<ItemType>, WorkerError> {
        let seeded = self.item_types.seed_standard().await?;
        info!(count = seeded.len(), "Item types seeded");
        Ok(seeded)
    }

    /// Stages a JSON array of claim envelopes as one run
    #[instrument(skip(self, json), fields(bytes = json.len()))]
    pub async fn ingest_json(&self, json: &str) -> Result<IngestSummary, WorkerError> {
        let envelopes: Vec<ClaimEnvelope> =
            serde_json::from_str(json).map_err(|e| WorkerError::Input(e.to_string()))?;
        let (committed, rejected) = self.intake.ingest_all(envelopes).await?;
        let summary = IngestSummary {
            run_id: committed.run_id,
            claims: committed.claim_count(),
            services: committed.service_count(),
            rejected: rejected
                .into_iter()
                .map(|(claim, error)| RejectedEnvelope {
                    claim,
                    reason: error.to_string(),
                })
                .collect(),
        };
        info!(
            run_id = %summary.run_id,
            claims = summary.claims,
            services = summary.services,
            rejected = summary.rejected.len(),
            "Ingestion run committed"
        );
        Ok(summary)
    }

    /// Applies a JSON array of acknowledgments from an external system
    #[instrument(skip(self, json), fields(bytes = json.len()))]
    pub async fn acknowledge_json(&self, json: &str) -> Result<Vec<AckOutcome>, WorkerError> {
        let acks: Vec<Acknowledgment> =
            serde_json::from_str(json).map_err(|e| WorkerError::Input(e.to_string()))?;
        let mut outcomes = Vec::with_capacity(acks.len());
        for ack in acks {
            let outcome = self.uploads.acknowledge(ack).await?;
            if !outcome.is_applied() {
                warn!(?outcome, "Acknowledgment not applied");
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Health of every storage adapter
    pub async fn health(&self) -> Vec<HealthCheckResult> {
        vec![
            self.ports.channels.health_check().await,
            self.ports.item_types.health_check().await,
            self.ports.staging.health_check().await,
            self.ports.watermarks.health_check().await,
            self.ports.uploads.health_check().await,
        ]
    }
}
