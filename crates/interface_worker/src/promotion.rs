//! Promotion handoff used by the standalone worker
//!
//! Production records are owned by another system. Until that system is
//! connected, the worker hands promoted claims to the log as structured
//! events so that downstream tooling can pick them up.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use core_kernel::{DomainPort, PortError};
use domain_intake::{PromotedClaim, PromotionPort, StagedClaim, StagedClaimService};

/// Emits one `info` event per promoted claim or late line batch
#[derive(Debug, Default)]
pub struct LogPromotionPort {
    claims: AtomicU64,
    lines: AtomicU64,
}

impl LogPromotionPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims and service lines handed over so far
    pub fn totals(&self) -> (u64, u64) {
        (self.claims.load(Ordering::Relaxed), self.lines.load(Ordering::Relaxed))
    }
}

impl DomainPort for LogPromotionPort {}

#[async_trait]
impl PromotionPort for LogPromotionPort {
    async fn promote(&self, promoted: &PromotedClaim) -> Result<(), PortError> {
        let payload = serde_json::to_string(promoted).map_err(|e| PortError::internal(e.to_string()))?;
        info!(
            staged_claim_id = %promoted.claim.id,
            claim = %promoted.claim.claim_ref(),
            lines = promoted.services.len(),
            service_total = %promoted.service_total(),
            %payload,
            "Claim promoted"
        );
        self.claims.fetch_add(1, Ordering::Relaxed);
        self.lines.fetch_add(promoted.services.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn promote_lines(&self, parent: &StagedClaim, lines: &[StagedClaimService]) -> Result<(), PortError> {
        info!(
            staged_claim_id = %parent.id,
            claim = %parent.claim_ref(),
            lines = lines.len(),
            "Late service lines promoted"
        );
        self.lines.fetch_add(lines.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
