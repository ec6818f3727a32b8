//! Kernel errors

use thiserror::Error;
use crate::identifiers::IdParseError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Identifier error: {0}")]
    IdParse(#[from] IdParseError),

    /// A value outside the kernel types' domain, such as an empty id block
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }
}
