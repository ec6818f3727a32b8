//! Referential integrity validation
//!
//! The validator works one committed range at a time. Claim ranges check the
//! channel of every claim and hand valid claims, together with the pending
//! service lines their own run staged for them, to the promotion
//! collaborator. Service ranges pick up whatever the claim pass did not
//! settle: lines whose parent could not be resolved at ingest, lines staged
//! by another run, lines whose parent was quarantined, and lines that arrived
//! after their parent was promoted.
//!
//! A line's parent must belong to the line's own run or to a run that
//! reserved its claim identifiers earlier, so a parent never sits above the
//! last claim its run committed. A parent staged by an earlier run that has
//! not committed yet leaves the line deferred until it does or aborts.
//!
//! Every decision is a compare-and-set on a pending row, so running the same
//! range twice, or concurrently with another worker, changes nothing the
//! second time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use core_kernel::{ChannelId, PortError, ServiceLineId, StagedClaimId};
use domain_registry::{ChannelRegistry, ChannelResolution};

use crate::claim::{
    ClaimRef, QuarantineReason, StagedClaim, StagedClaimService, StagingStatus,
};
use crate::error::IntakeError;
use crate::ports::StagingPort;
use crate::promotion::{PromotedClaim, PromotionPort};
use crate::watermark::{BatchWatermark, EntityKind, WatermarkTracker};

/// The staged row a validation decision applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowRef {
    Claim { id: StagedClaimId, claim_ref: ClaimRef },
    Service { id: ServiceLineId, claim_ref: ClaimRef },
}

impl RowRef {
    fn claim(claim: &StagedClaim) -> Self {
        RowRef::Claim {
            id: claim.id,
            claim_ref: claim.claim_ref(),
        }
    }

    fn service(service: &StagedClaimService) -> Self {
        RowRef::Service {
            id: service.id,
            claim_ref: service.claim_ref.clone(),
        }
    }
}

/// A row that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantinedRow {
    pub row: RowRef,
    pub reason: QuarantineReason,
}

/// A row left pending, to be retried with its range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredRow {
    pub row: RowRef,
    pub message: String,
}

/// Outcome of validating one or more ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub ranges: Vec<BatchWatermark>,
    pub promoted_claims: Vec<StagedClaimId>,
    pub promoted_services: Vec<ServiceLineId>,
    pub quarantined: Vec<QuarantinedRow>,
    pub deferred: Vec<DeferredRow>,
    /// Rows that were already processed
    pub skipped: usize,
}

impl ValidationReport {
    pub fn merge(&mut self, other: ValidationReport) {
        self.ranges.extend(other.ranges);
        self.promoted_claims.extend(other.promoted_claims);
        self.promoted_services.extend(other.promoted_services);
        self.quarantined.extend(other.quarantined);
        self.deferred.extend(other.deferred);
        self.skipped += other.skipped;
    }

    /// True when nothing is left pending and the range can be completed
    pub fn is_settled(&self) -> bool {
        self.deferred.is_empty()
    }

    pub fn quarantined_for(&self, reason: QuarantineReason) -> Vec<&RowRef> {
        self.quarantined
            .iter()
            .filter(|q| q.reason == reason)
            .map(|q| &q.row)
            .collect()
    }

    fn quarantine(&mut self, row: RowRef, reason: QuarantineReason) {
        warn!(row = ?row, reason = %reason, "Quarantined staged row");
        self.quarantined.push(QuarantinedRow { row, reason });
    }

    fn defer(&mut self, row: RowRef, message: impl Into<String>) {
        let message = message.into();
        debug!(row = ?row, message = %message, "Deferred staged row");
        self.deferred.push(DeferredRow { row, message });
    }
}

/// Validates committed ranges and hands valid claims to promotion
#[derive(Clone)]
pub struct Validator {
    channels: ChannelRegistry,
    staging: Arc<dyn StagingPort>,
    tracker: WatermarkTracker,
    promotion: Arc<dyn PromotionPort>,
}

impl Validator {
    pub fn new(
        channels: ChannelRegistry,
        staging: Arc<dyn StagingPort>,
        tracker: WatermarkTracker,
        promotion: Arc<dyn PromotionPort>,
    ) -> Self {
        Self {
            channels,
            staging,
            tracker,
            promotion,
        }
    }

    /// Validates every pending row in a committed range
    ///
    /// Row-level problems end up in the report; only storage or registry
    /// failures are returned as errors.
    #[instrument(skip(self, range), fields(
        watermark_id = %range.id,
        kind = %range.kind,
        first = range.first_id,
        last = range.last_id
    ))]
    pub async fn validate(&self, range: &BatchWatermark) -> Result<ValidationReport, IntakeError> {
        let mut report = match range.kind {
            EntityKind::StagedClaim => self.validate_claims(range).await?,
            EntityKind::StagedClaimService => self.validate_services(range).await?,
        };
        report.ranges.push(range.clone());
        info!(
            promoted_claims = report.promoted_claims.len(),
            promoted_services = report.promoted_services.len(),
            quarantined = report.quarantined.len(),
            deferred = report.deferred.len(),
            skipped = report.skipped,
            "Validated range"
        );
        Ok(report)
    }

    /// Quarantined rows awaiting operator review, newest first
    pub async fn quarantine_backlog(
        &self,
        limit: u32,
    ) -> Result<(Vec<StagedClaim>, Vec<StagedClaimService>), IntakeError> {
        let claims = self.staging.quarantined_claims(limit).await?;
        let services = self.staging.quarantined_services(limit).await?;
        Ok((claims, services))
    }

    async fn validate_claims(&self, range: &BatchWatermark) -> Result<ValidationReport, IntakeError> {
        let mut report = ValidationReport::default();
        let mut channels: HashMap<ChannelId, ChannelResolution> = HashMap::new();

        for claim in self.staging.claims_in_range(range.first_id, range.last_id).await? {
            if !claim.is_pending() {
                report.skipped += 1;
                continue;
            }

            let resolution = match channels.get(&claim.channel_id) {
                Some(resolution) => resolution.clone(),
                None => {
                    let resolution = self.channels.resolve(claim.channel_id).await?;
                    channels.insert(claim.channel_id, resolution.clone());
                    resolution
                }
            };
            let reason = match resolution {
                ChannelResolution::Active(_) => None,
                ChannelResolution::Inactive(_) => Some(QuarantineReason::InactiveChannel),
                ChannelResolution::Unknown(_) => Some(QuarantineReason::UnknownChannel),
            };

            match reason {
                Some(reason) => self.quarantine_claim(&claim, reason, &mut report).await?,
                None => self.promote_claim(claim, &mut report).await?,
            }
        }
        Ok(report)
    }

    async fn promote_claim(
        &self,
        claim: StagedClaim,
        report: &mut ValidationReport,
    ) -> Result<(), IntakeError> {
        // Lines from other runs wait for their own range to be committed
        let services: Vec<StagedClaimService> = self
            .staging
            .services_for_claim(claim.id)
            .await?
            .into_iter()
            .filter(|s| s.is_pending() && s.run_id == claim.run_id)
            .collect();
        let promoted = PromotedClaim { claim, services };

        if let Err(e) = self.promotion.promote(&promoted).await {
            report.defer(RowRef::claim(&promoted.claim), format!("promotion failed: {}", e));
            return Ok(());
        }

        if self
            .staging
            .set_claim_status(promoted.claim.id, StagingStatus::Promoted, None)
            .await?
        {
            report.promoted_claims.push(promoted.claim.id);
        } else {
            report.skipped += 1;
        }
        for service in &promoted.services {
            if self
                .staging
                .set_service_status(service.id, StagingStatus::Promoted, None)
                .await?
            {
                report.promoted_services.push(service.id);
            }
        }
        debug!(
            staged_claim_id = %promoted.claim.id,
            service_lines = promoted.services.len(),
            "Promoted claim"
        );
        Ok(())
    }

    async fn quarantine_claim(
        &self,
        claim: &StagedClaim,
        reason: QuarantineReason,
        report: &mut ValidationReport,
    ) -> Result<(), IntakeError> {
        if !self
            .staging
            .set_claim_status(claim.id, StagingStatus::Quarantined, Some(reason))
            .await?
        {
            report.skipped += 1;
            return Ok(());
        }
        report.quarantine(RowRef::claim(claim), reason);

        for service in self.staging.services_for_claim(claim.id).await? {
            if !service.is_pending() || service.run_id != claim.run_id {
                continue;
            }
            if self
                .staging
                .set_service_status(
                    service.id,
                    StagingStatus::Quarantined,
                    Some(QuarantineReason::ParentQuarantined),
                )
                .await?
            {
                report.quarantine(RowRef::service(&service), QuarantineReason::ParentQuarantined);
            }
        }
        Ok(())
    }

    async fn validate_services(&self, range: &BatchWatermark) -> Result<ValidationReport, IntakeError> {
        let mut report = ValidationReport::default();
        let latest_parent = self
            .tracker
            .run_range(range.run_id, EntityKind::StagedClaim)
            .await?
            .map(|claims| claims.last_id)
            .ok_or_else(|| PortError::not_found("BatchWatermark", format!("claims of run {}", range.run_id)))?;

        for service in self.staging.services_in_range(range.first_id, range.last_id).await? {
            if !service.is_pending() {
                report.skipped += 1;
                continue;
            }

            let (parent, linked) = match service.parent_id {
                Some(parent_id) => (self.staging.get_claim(parent_id).await?, true),
                None => (self.staging.find_claim_by_ref(&service.claim_ref).await?, false),
            };
            let parent = match parent {
                Some(parent) if parent.id.value() <= latest_parent => parent,
                _ => {
                    self.quarantine_service(&service, QuarantineReason::OrphanedService, &mut report)
                        .await?;
                    continue;
                }
            };
            if !linked {
                self.staging.link_service_parent(service.id, parent.id).await?;
            }
            if !self
                .tracker
                .is_committed(EntityKind::StagedClaim, parent.id.value())
                .await?
            {
                report.defer(RowRef::service(&service), "parent claim range not committed");
                continue;
            }

            match parent.status {
                StagingStatus::Quarantined => {
                    self.quarantine_service(&service, QuarantineReason::ParentQuarantined, &mut report)
                        .await?;
                }
                StagingStatus::Pending => {
                    report.defer(RowRef::service(&service), "parent claim not yet validated");
                }
                StagingStatus::Promoted => {
                    if let Err(e) = self
                        .promotion
                        .promote_lines(&parent, std::slice::from_ref(&service))
                        .await
                    {
                        report.defer(RowRef::service(&service), format!("promotion failed: {}", e));
                        continue;
                    }
                    if self
                        .staging
                        .set_service_status(service.id, StagingStatus::Promoted, None)
                        .await?
                    {
                        report.promoted_services.push(service.id);
                    }
                }
            }
        }
        Ok(report)
    }

    async fn quarantine_service(
        &self,
        service: &StagedClaimService,
        reason: QuarantineReason,
        report: &mut ValidationReport,
    ) -> Result<(), IntakeError> {
        if self
            .staging
            .set_service_status(service.id, StagingStatus::Quarantined, Some(reason))
            .await?
        {
            report.quarantine(RowRef::service(service), reason);
        } else {
            report.skipped += 1;
        }
        Ok(())
    }
}
