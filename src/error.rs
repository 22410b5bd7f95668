use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DepotError {
    #[error("failed to read components manifest at {0}")]
    ComponentsRead(PathBuf),

    #[error("failed to parse components manifest: {0}")]
    ComponentsParse(String),

    #[error("components manifest is missing required keys: {0}")]
    ComponentsMissingKeys(String),

    #[error("invalid download file pattern: {0}")]
    InvalidPattern(String),

    #[error("failed to parse settings: {0}")]
    SettingsParse(String),

    #[error("source request failed: {0}")]
    SourceHttp(String),

    #[error("source returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("transfer failed: {0}")]
    TransferHttp(String),

    #[error("transfer returned status {status} for {url}")]
    TransferStatus { status: u16, url: String },

    #[error("segment {index} failed: {message}")]
    Segment { index: usize, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("download directory is invalid: {0}")]
    InvalidDestination(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("no fresh cached catalog found, run `depot scan` first")]
    MissingCatalog,

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
