//! Registry Domain
//!
//! Reference data consulted by every other pipeline stage:
//!
//! - **Channels**: the external sources claims arrive from (partner
//!   integrations such as `SMART APPLICATIONS`). Only active channels may
//!   submit claims, and a channel deactivated after submission causes its
//!   still-staged claims to be quarantined at validation.
//! - **Item types**: the kinds of production entity (members, schemes,
//!   benefits, ...) that are propagated to third-party systems and tracked by
//!   the upload tracker.
//!
//! Both are identified by monotonic keys and unique names. Once created, a
//! registry row can only have its active flag toggled.

pub mod channel;
pub mod item_type;
pub mod registry;
pub mod error;
pub mod ports;

pub use channel::{Channel, NewChannel, ChannelResolution};
pub use item_type::{ItemType, NewItemType, StandardItemType};
pub use registry::{ChannelRegistry, ItemTypeRegistry};
pub use error::RegistryError;
pub use ports::{ChannelPort, ItemTypePort};
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::MockRegistryPort;
