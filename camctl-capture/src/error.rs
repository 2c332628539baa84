//! Error types for camctl-capture
//!
//! One variant per failure class of the capture-transfer core. Which of them
//! abort a capture and which are only recorded is decided by the caller:
//! `Transfer`, `NamingResolution` and `Metadata` end the pipeline, `Backup`
//! and `Plugin` are recorded and the pipeline goes on, and `PresetApply` and
//! `PresetVerify` are isolated to one device of a batch.

use thiserror::Error;

/// Main error type for camctl-capture
#[derive(Error, Debug)]
pub enum Error {
    /// Download from the device or copy to the destination failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// No legal destination path could be formed
    #[error("Naming error: {0}")]
    NamingResolution(String),

    /// Backup copy failed (primary file is still valid)
    #[error("Backup error: {0}")]
    Backup(String),

    /// Comment or keyword could not be written
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A post-capture plugin failed
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Writing preset values to a device failed
    #[error("Preset apply error: {0}")]
    PresetApply(String),

    /// Reading device values for preset verification failed
    #[error("Preset verify error: {0}")]
    PresetVerify(String),

    /// Device layer failure outside of a transfer
    #[error("Device error: {0}")]
    Device(String),

    /// Configuration errors (including unknown plugin types)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<camctl_common::Error> for Error {
    fn from(err: camctl_common::Error) -> Self {
        match err {
            camctl_common::Error::Io(e) => Error::Io(e),
            camctl_common::Error::Config(msg) => Error::Config(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Convenience Result type using camctl-capture Error
pub type Result<T> = std::result::Result<T, Error>;
