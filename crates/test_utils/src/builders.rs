//! Test Data Builders
//!
//! Builders for claim envelopes and service lines. Identifiers that must be
//! unique within a run (external claim ids, member numbers) are randomised
//! with `fake` unless a test pins them.

use chrono::NaiveDate;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::ChannelId;
use domain_intake::{ClaimEnvelope, ServiceLineInput};

use crate::fixtures::ClaimFixtures;

/// Random external claim id in the `CLM-` namespace used by the channels
pub fn fake_external_claim_id() -> String {
    format!("CLM-{}", (100_000_000u64..999_999_999u64).fake::<u64>())
}

pub fn fake_member_number() -> String {
    format!("MEM-{}", (100_000u32..999_999u32).fake::<u32>())
}

/// Builder for claim envelopes
#[derive(Debug, Clone)]
pub struct ClaimEnvelopeBuilder {
    envelope: ClaimEnvelope,
}

impl ClaimEnvelopeBuilder {
    /// A valid envelope with one consultation line
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            envelope: ClaimEnvelope {
                channel_id,
                external_claim_id: fake_external_claim_id(),
                scheme_code: ClaimFixtures::scheme_code().to_string(),
                provider_code: ClaimFixtures::provider_code().to_string(),
                member_number: fake_member_number(),
                benefit_id: ClaimFixtures::benefit_id().to_string(),
                amount: ClaimFixtures::amount(),
                invoice_date: ClaimFixtures::invoice_date(),
                service_lines: vec![ServiceLineBuilder::new().build()],
            },
        }
    }

    pub fn with_external_id(mut self, external_claim_id: impl Into<String>) -> Self {
        self.envelope.external_claim_id = external_claim_id.into();
        self
    }

    pub fn with_member_number(mut self, member_number: impl Into<String>) -> Self {
        self.envelope.member_number = member_number.into();
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.envelope.amount = amount;
        self
    }

    pub fn with_invoice_date(mut self, date: NaiveDate) -> Self {
        self.envelope.invoice_date = date;
        self
    }

    /// Replaces the service lines
    pub fn with_lines(mut self, lines: Vec<ServiceLineInput>) -> Self {
        self.envelope.service_lines = lines;
        self
    }

    pub fn without_lines(self) -> Self {
        self.with_lines(Vec::new())
    }

    /// Appends a line that names a different parent claim on the same channel
    pub fn with_line_for(mut self, parent_external_id: impl Into<String>) -> Self {
        self.envelope
            .service_lines
            .push(ServiceLineBuilder::new().for_parent(parent_external_id).build());
        self
    }

    pub fn build(self) -> ClaimEnvelope {
        self.envelope
    }

    /// The envelope as the JSON a channel would submit
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.envelope).unwrap_or_default()
    }
}

/// Builder for service lines
#[derive(Debug, Clone)]
pub struct ServiceLineBuilder {
    line: ServiceLineInput,
}

impl Default for ServiceLineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceLineBuilder {
    pub fn new() -> Self {
        Self {
            line: ServiceLineInput {
                claim_external_id: None,
                service_code: ClaimFixtures::service_code().to_string(),
                quantity: dec!(1),
                amount: ClaimFixtures::amount(),
                diagnosis_code: Some(ClaimFixtures::diagnosis_code().to_string()),
            },
        }
    }

    pub fn with_service_code(mut self, code: impl Into<String>) -> Self {
        self.line.service_code = code.into();
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.line.quantity = quantity;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.line.amount = amount;
        self
    }

    pub fn for_parent(mut self, parent_external_id: impl Into<String>) -> Self {
        self.line.claim_external_id = Some(parent_external_id.into());
        self
    }

    pub fn build(self) -> ServiceLineInput {
        self.line
    }
}

/// A file of `count` valid envelopes for one channel, as a JSON array
pub fn envelope_file(channel_id: ChannelId, count: usize) -> String {
    let envelopes: Vec<serde_json::Value> = (0..count)
        .map(|_| ClaimEnvelopeBuilder::new(channel_id).to_json())
        .collect();
    serde_json::Value::Array(envelopes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_default_envelope_is_valid() {
        let envelope = ClaimEnvelopeBuilder::new(ChannelId::new(1)).build();

        assert!(envelope.validate().is_ok());
        assert!(envelope.external_claim_id.starts_with("CLM-"));
        assert_eq!(envelope.service_lines.len(), 1);
    }

    #[test]
    fn test_line_for_other_parent() {
        let envelope = ClaimEnvelopeBuilder::new(ChannelId::new(1))
            .with_external_id("CLM-1")
            .without_lines()
            .with_line_for("CLM-0")
            .build();

        let parent = envelope.line_parent(&envelope.service_lines[0]);
        assert_eq!(parent.external_claim_id.as_str(), "CLM-0");
    }

    #[test]
    fn test_envelope_file_parses_back() {
        let file = envelope_file(ChannelId::new(3), 4);
        let parsed: Vec<ClaimEnvelope> = serde_json::from_str(&file).unwrap();

        assert_eq!(parsed.len(), 4);
        assert!(parsed.iter().all(|e| e.channel_id == ChannelId::new(3)));
    }
}
