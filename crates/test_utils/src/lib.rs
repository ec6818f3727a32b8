//! Test Utilities Crate
//!
//! Shared test infrastructure for the claims intake workspace.
//!
//! # Modules
//!
//! - `fixtures`: Stable channel and claim values
//! - `builders`: Envelope and service line builders
//! - `database`: PostgreSQL containers with the schema applied
//! - `assertions`: Watermark and staged row assertions
//! - `generators`: Proptest strategies for envelopes and acknowledgments

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
