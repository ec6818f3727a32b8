//! Promotion handoff
//!
//! Promotion into production records is owned by another system. The
//! validator hands it each valid claim together with its valid service lines.
//! Handoff is at-least-once: a crash between handoff and status update
//! repeats the handoff on restart, so implementations must treat the staged
//! claim id as an idempotency key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use core_kernel::{DomainPort, PortError};

use crate::claim::{StagedClaim, StagedClaimService};

/// A validated claim ready for production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedClaim {
    pub claim: StagedClaim,
    pub services: Vec<StagedClaimService>,
}

impl PromotedClaim {
    pub fn service_total(&self) -> rust_decimal::Decimal {
        self.services.iter().map(|s| s.amount).sum()
    }
}

/// Receiver of validated claims
#[async_trait]
pub trait PromotionPort: DomainPort {
    /// Hands over a claim and the service lines validated with it
    async fn promote(&self, claim: &PromotedClaim) -> Result<(), PortError>;

    /// Hands over service lines that were validated after their parent claim
    /// had already been promoted
    async fn promote_lines(
        &self,
        parent: &StagedClaim,
        lines: &[StagedClaimService],
    ) -> Result<(), PortError>;
}
