//! Pre-built Test Fixtures
//!
//! Stable values for tests that need a realistic claim without caring about
//! its contents.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use domain_registry::NewChannel;

/// Channels that submit claims in production
pub static CHANNEL_NAMES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["SMART APPLICATIONS", "PROVIDER PORTAL", "EDI GATEWAY", "MOBILE APP"]);

pub struct ChannelFixtures;

impl ChannelFixtures {
    pub fn smart() -> NewChannel {
        NewChannel::new(CHANNEL_NAMES[0]).with_description("Point-of-care claim capture")
    }

    pub fn portal() -> NewChannel {
        NewChannel::new(CHANNEL_NAMES[1])
    }

    pub fn all() -> Vec<NewChannel> {
        CHANNEL_NAMES.iter().map(|name| NewChannel::new(*name)).collect()
    }
}

pub struct ClaimFixtures;

impl ClaimFixtures {
    pub fn scheme_code() -> &'static str {
        "SCH-001"
    }

    pub fn provider_code() -> &'static str {
        "PRV-042"
    }

    pub fn member_number() -> &'static str {
        "MEM-100234"
    }

    pub fn benefit_id() -> &'static str {
        "OUTPATIENT"
    }

    pub fn amount() -> Decimal {
        dec!(1500.00)
    }

    pub fn invoice_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 14).unwrap_or_default()
    }

    pub fn service_code() -> &'static str {
        "CONSULTATION"
    }

    pub fn diagnosis_code() -> &'static str {
        "Z00.0"
    }
}
