//! Error types for the sync domain

use thiserror::Error;

use core_kernel::{ChannelId, PortError, UploadId};
use domain_registry::RegistryError;

use crate::upload::UploadState;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Upload not found: {0}")]
    UnknownUpload(UploadId),

    /// The requested move is not strictly forward
    #[error("Invalid transition for {upload_id}: {from} -> {to}")]
    InvalidTransition {
        upload_id: UploadId,
        from: UploadState,
        to: UploadState,
    },

    #[error("Item type not available: {0}")]
    UnknownItemType(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl From<RegistryError> for SyncError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::ItemTypeNotFound(name) => SyncError::UnknownItemType(name),
            RegistryError::ChannelNotFound(id) => SyncError::UnknownChannel(id),
            other => SyncError::Registry(other),
        }
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(errors: validator::ValidationErrors) -> Self {
        SyncError::InvalidUpload(errors.to_string())
    }
}
