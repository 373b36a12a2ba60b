//! Error types for booking-engine operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage unavailable ({context}): {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt ledger at line {line}: {message}")]
    CorruptLedger { line: usize, message: String },

    #[error("Artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("Ledger is locked by {holder} ({})", path.display())]
    LedgerLocked { path: PathBuf, holder: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

impl BookingError {
    /// Wrap an I/O failure with a short description of what was being accessed.
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        BookingError::StorageUnavailable {
            context: context.into(),
            source,
        }
    }

    /// True for failures of the backing store (ledger or artifact destination).
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            BookingError::StorageUnavailable { .. }
                | BookingError::CorruptLedger { .. }
                | BookingError::ArtifactExists(_)
        )
    }
}

impl From<config::ConfigError> for BookingError {
    fn from(err: config::ConfigError) -> Self {
        BookingError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
