//! Registry domain errors

use thiserror::Error;

use core_kernel::{ChannelId, PortError};

/// Errors that can occur in the registry domain
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("Channel name already registered: {0}")]
    ChannelNameTaken(String),

    #[error("Item type not found: {0}")]
    ItemTypeNotFound(String),

    #[error("Item type name already registered: {0}")]
    ItemTypeNameTaken(String),

    #[error("Invalid registry entry: {0}")]
    InvalidEntry(String),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl From<validator::ValidationErrors> for RegistryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        RegistryError::InvalidEntry(errors.to_string())
    }
}
