//! Error types for the provisioning sequence.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that abort the whole sequence.
///
/// Everything else (failed downloads, installers that leave no marker,
/// services that do not spawn) is reported on the status log and never
/// surfaces as an error.
#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error("config: {0}")]
    Config(String),

    #[error("ownership of {}: {source}", .path.display())]
    Ownership {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Artifact download failure.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("http: {0}")]
    Http(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("download task: {0}")]
    Task(String),
}

/// Install ledger read/write failure.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
