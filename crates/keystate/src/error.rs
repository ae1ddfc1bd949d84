//! Error types for the keystate crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during state store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored grant list could not be encoded or decoded
    #[error("grant encoding error: {0}")]
    Grants(#[from] serde_json::Error),

    /// Database file could not be opened
    #[error("cannot open state database {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A recorded key identifier would be replaced by a different one
    #[error("key '{name}' is recorded as '{recorded}', refusing to replace it with '{proposed}'")]
    KeyReassigned {
        name: String,
        recorded: String,
        proposed: String,
    },

    /// A stored row does not describe a valid state
    #[error("corrupt state for '{name}': {message}")]
    Corrupt { name: String, message: String },
}

impl From<Error> for kmskit::Error {
    fn from(e: Error) -> Self {
        kmskit::Error::Persistence(e.to_string())
    }
}

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, Error>;
