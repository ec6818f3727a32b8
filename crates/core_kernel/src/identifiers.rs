//! Strongly-typed identifiers for pipeline entities
//!
//! Every durable relation carries a system-assigned, monotonically increasing
//! integer key. Newtype wrappers keep a staged claim id from being passed where
//! an upload id is expected. Source-supplied claim references and ingestion run
//! handles get their own types as well.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when an identifier string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} identifier: '{input}'")]
pub struct IdParseError {
    pub kind: &'static str,
    pub input: String,
}

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw key value
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw key value
            pub const fn value(&self) -> i64 {
                self.0
            }

            /// Returns the identifier that directly follows this one
            pub const fn next(&self) -> Self {
                Self(self.0 + 1)
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                raw.parse::<i64>().map(Self).map_err(|_| IdParseError {
                    kind: $prefix,
                    input: s.to_string(),
                })
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

// Registry identifiers
define_id!(ChannelId, "CHN");
define_id!(ItemTypeId, "ITY");

// Staging identifiers
define_id!(StagedClaimId, "STC");
define_id!(ServiceLineId, "STS");
define_id!(WatermarkId, "WMK");

// Synchronization identifiers
define_id!(UploadId, "UPL");

/// Claim identifier supplied by the originating channel
///
/// Only unique within its channel. Surrounding whitespace is trimmed so that
/// `" CLM-1 "` and `"CLM-1"` collide as duplicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalClaimId(String);

impl ExternalClaimId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExternalClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalClaimId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExternalClaimId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifier of one ingestion run (batch)
///
/// Time-ordered so that runs sort by start time in logs and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchRunId(Uuid);

impl BatchRunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RUN-{}", self.0)
    }
}
