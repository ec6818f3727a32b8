//! Inbound claim envelopes
//!
//! The shape a channel submits: claim-level fields plus zero or more service
//! lines. Envelopes are checked for completeness before they consume a
//! staging identifier.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use core_kernel::{ChannelId, ExternalClaimId};

use crate::claim::ClaimRef;

/// A claim as submitted by a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClaimEnvelope {
    pub channel_id: ChannelId,
    #[validate(length(min = 1, max = 100), custom(function = "not_blank"))]
    pub external_claim_id: String,
    #[validate(length(min = 1, max = 50))]
    pub scheme_code: String,
    #[validate(length(min = 1, max = 50))]
    pub provider_code: String,
    #[validate(length(min = 1, max = 50))]
    pub member_number: String,
    #[validate(length(min = 1, max = 50))]
    pub benefit_id: String,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    pub invoice_date: NaiveDate,
    #[validate(nested)]
    #[serde(default)]
    pub service_lines: Vec<ServiceLineInput>,
}

/// A service line as submitted by a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServiceLineInput {
    /// External id of the parent claim when it differs from the enclosing
    /// envelope; lines without one belong to the envelope's claim
    #[serde(default)]
    pub claim_external_id: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub service_code: String,
    #[validate(custom(function = "positive_quantity"))]
    pub quantity: Decimal,
    #[validate(custom(function = "non_negative_amount"))]
    pub amount: Decimal,
    #[serde(default)]
    pub diagnosis_code: Option<String>,
}

impl ClaimEnvelope {
    pub fn external_id(&self) -> ExternalClaimId {
        ExternalClaimId::new(self.external_claim_id.as_str())
    }

    pub fn claim_ref(&self) -> ClaimRef {
        ClaimRef::new(self.channel_id, self.external_id())
    }

    /// Parent reference declared by a service line
    pub fn line_parent(&self, line: &ServiceLineInput) -> ClaimRef {
        match line.claim_external_id.as_deref().map(str::trim) {
            Some(parent) if !parent.is_empty() => ClaimRef::new(self.channel_id, parent),
            _ => self.claim_ref(),
        }
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    Ok(())
}

fn positive_quantity(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("quantity_not_positive"));
    }
    Ok(())
}

fn non_negative_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("amount_negative"));
    }
    Ok(())
}
