use std::time::Duration;

use thiserror::Error;

/// Every failure the backup subsystem can surface to a caller.
///
/// Messages are one line and never carry paths outside the store, URLs or
/// credentials; the HTTP layer returns them verbatim.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup name not allowed: {0}")]
    InvalidName(String),

    #[error("Backup path escapes the backup directory: {0}")]
    PathEscape(String),

    #[error("Unsupported backup kind: {0}")]
    InvalidKind(String),

    #[error("Only .dump backups can be imported: {0}")]
    InvalidImport(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Database dump timed out after {}s", .0.as_secs())]
    DumpTimeout(Duration),

    #[error("Database dump failed: {0}")]
    DumpFailed(String),

    #[error("Database restore timed out after {}s", .0.as_secs())]
    RestoreTimeout(Duration),

    #[error("Database restore failed: {0}")]
    RestoreFailed(String),

    #[error("Backup could not be decrypted with the configured key")]
    Decryption,

    #[error("Backup encryption failed: {0}")]
    Encryption(String),

    #[error("Upload to remote archive failed: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            BackupError::InvalidName(_)
            | BackupError::PathEscape(_)
            | BackupError::InvalidKind(_)
            | BackupError::InvalidImport(_)
            | BackupError::InvalidBucket(_) => 400,
            BackupError::NotFound(_) => 404,
            BackupError::DumpTimeout(_) | BackupError::RestoreTimeout(_) => 504,
            BackupError::DumpFailed(_)
            | BackupError::RestoreFailed(_)
            | BackupError::Decryption
            | BackupError::Encryption(_)
            | BackupError::Upload(_)
            | BackupError::Config(_)
            | BackupError::Io(_) => 500,
        }
    }

    /// Message safe to hand back to a remote caller.
    ///
    /// Raw I/O errors can embed absolute paths, so they collapse to a fixed
    /// string; everything else is already phrased for the caller.
    pub fn public_message(&self) -> String {
        match self {
            BackupError::Io(_) => "Internal storage error".to_string(),
            BackupError::Config(_) => "Server misconfiguration".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
