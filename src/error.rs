// src/error.rs

//! Error types for cairn
//!
//! The resolver itself rarely propagates these: most failures abort a single
//! item and are recorded as warnings. They surface from document I/O, the
//! fetch collaborator, configuration loading and the top-level check run.

use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    #[error("Could not find {0} in any catalog")]
    NotFound(String),

    #[error("No eligible version of {name} found: {reasons}")]
    NoEligibleVersion { name: String, reasons: String },

    #[error("{0} is scheduled for both install and removal")]
    ConflictingDecision(String),

    #[error("Could not resolve all dependencies for {name}: {detail}")]
    DependencyUnresolved { name: String, detail: String },

    #[error("Cycle detected while processing {0}")]
    CycleDetected(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Another run holds the lock at {0}")]
    Locked(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Could not retrieve any primary manifest")]
    NoPrimaryManifest,
}

/// Result type alias for cairn operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<plist::Error> for Error {
    fn from(e: plist::Error) -> Self {
        Error::MalformedDocument {
            path: String::from("<plist>"),
            reason: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
