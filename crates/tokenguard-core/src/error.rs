//! Error types for tokenguard-core

use thiserror::Error;

/// Result type alias for tokenguard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Tokenguard error types
///
/// Duplicate ranges and declined confirmations are not errors; they are
/// reported through the operation outcomes in [`crate::policy`].
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Token with key '{0}' not found")]
    CredentialNotFound(String),

    #[error("Token with key '{0}' already exists")]
    CredentialExists(String),

    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl GuardError {
    /// Whether this error was caused by operator input rather than the environment
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialNotFound(_)
                | Self::CredentialExists(_)
                | Self::InvalidCidr(_)
                | Self::InvalidAddress(_)
        )
    }
}
