//! Property-Based Test Generators
//!
//! Proptest strategies that only produce envelopes the intake service will
//! accept, plus acknowledgment sequences for the upload tracker.

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::{ChannelId, UploadId};
use domain_intake::{ClaimEnvelope, ServiceLineInput};
use domain_sync::{AckKind, Acknowledgment};

/// Positive amounts with two decimal places
pub fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

pub fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000i64).prop_map(Decimal::from)
}

pub fn invoice_date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..3_650i64).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2015, 1, 1)
            .unwrap_or_default()
            .checked_add_signed(chrono::Duration::days(offset))
            .unwrap_or_default()
    })
}

/// External claim ids as channels send them, including surrounding blanks
pub fn external_claim_id_strategy() -> impl Strategy<Value = String> {
    ("[A-Z]{3}-[0-9]{1,9}", prop::bool::ANY)
        .prop_map(|(id, padded)| if padded { format!("  {}  ", id) } else { id })
}

pub fn service_line_strategy() -> impl Strategy<Value = ServiceLineInput> {
    ("[A-Z]{3,12}", quantity_strategy(), amount_strategy()).prop_map(|(code, quantity, amount)| {
        ServiceLineInput {
            claim_external_id: None,
            service_code: code,
            quantity,
            amount,
            diagnosis_code: None,
        }
    })
}

pub fn envelope_strategy(channel_id: ChannelId) -> impl Strategy<Value = ClaimEnvelope> {
    (
        external_claim_id_strategy(),
        "MEM-[0-9]{6}",
        amount_strategy(),
        invoice_date_strategy(),
        prop::collection::vec(service_line_strategy(), 0..4),
    )
        .prop_map(move |(external, member, amount, invoice_date, lines)| ClaimEnvelope {
            channel_id,
            external_claim_id: external,
            scheme_code: "SCH-001".to_string(),
            provider_code: "PRV-042".to_string(),
            member_number: member,
            benefit_id: "OUTPATIENT".to_string(),
            amount,
            invoice_date,
            service_lines: lines,
        })
}

/// Envelopes whose external ids are distinct after trimming
pub fn distinct_envelopes_strategy(
    channel_id: ChannelId,
    max: usize,
) -> impl Strategy<Value = Vec<ClaimEnvelope>> {
    prop::collection::vec(envelope_strategy(channel_id), 1..max).prop_map(|mut envelopes| {
        let mut seen = std::collections::HashSet::new();
        envelopes.retain(|e| seen.insert(e.external_claim_id.trim().to_string()));
        envelopes
    })
}

pub fn ack_kind_strategy() -> impl Strategy<Value = AckKind> {
    prop_oneof![Just(AckKind::Sent), Just(AckKind::Received)]
}

/// Acknowledgments for one upload, in arbitrary order and with repeats
pub fn ack_sequence_strategy(upload_id: UploadId) -> impl Strategy<Value = Vec<Acknowledgment>> {
    prop::collection::vec(ack_kind_strategy(), 1..8).prop_map(move |kinds| {
        kinds
            .into_iter()
            .map(|kind| Acknowledgment {
                upload_id,
                kind,
                at: chrono::Utc::now(),
                detail: None,
            })
            .collect()
    })
}
