//! Error types for AtlasDB
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasDB operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors (caller input, never retried)
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("WAL manager terminated")]
    Terminated,

    // -------------------------------------------------------------------------
    // Remote Store Errors
    // -------------------------------------------------------------------------
    #[error("Remote store error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AtlasError {
    /// Build a validation error from anything printable
    pub fn validation(msg: impl Into<String>) -> Self {
        AtlasError::Validation(msg.into())
    }

    /// Build a WAL corruption (processing) error
    pub fn corruption(msg: impl Into<String>) -> Self {
        AtlasError::WalCorruption(msg.into())
    }

    /// True for errors caused by caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, AtlasError::Validation(_))
    }
}

impl From<bincode::Error> for AtlasError {
    fn from(e: bincode::Error) -> Self {
        AtlasError::Serialization(e.to_string())
    }
}
