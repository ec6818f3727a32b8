//! Upload Synchronization Domain
//!
//! Production entities (members, schemes, benefits, ...) are propagated to
//! third-party systems per channel. Each propagation is an [`UploadRecord`]
//! whose state only ever moves forward:
//!
//! ```text
//! NotSent ──► Sent ──► Received
//!    └──────────────────┘  (acknowledged before the send was confirmed)
//! ```
//!
//! Acknowledgments arrive from outside and may be duplicated or reordered.
//! They are applied as compare-and-set transitions; anything that would move
//! a record backwards, or refers to an unknown record, is logged and reported
//! as an [`AckOutcome`] rather than failing the caller.

pub mod upload;
pub mod tracker;
pub mod error;
pub mod ports;

pub use upload::{
    UploadRecord, UploadState, NewUpload, Acknowledgment, AckKind, AckOutcome, StateChange,
    Transition,
};
pub use tracker::UploadTracker;
pub use error::SyncError;
pub use ports::UploadPort;
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::MockUploadPort;
