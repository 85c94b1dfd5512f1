use std::path::PathBuf;

use thiserror::Error;

use crate::types::ids::CollectionId;

/// Bad caller input, surfaced synchronously.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("No file uploaded")]
    EmptyUpload,

    #[error("Collection ID is required")]
    MissingCollection,

    #[error("Unknown collection: {0}")]
    UnknownCollection(CollectionId),

    #[error("Invalid upload file name: {0:?}")]
    InvalidFileName(String),
}

/// Failures of the compress+publish unit. Nothing is persisted when one of
/// these is returned.
#[derive(Error, Debug)]
pub enum FatalIngestError {
    #[error("Video compression failed: {0}")]
    Transcode(#[from] MediaToolError),

    #[error("Streaming host publish failed: {0}")]
    Publish(#[from] HostError),

    #[error("Ingest task panicked: {0}")]
    TaskPanicked(&'static str),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fatal(#[from] FatalIngestError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the streaming host collaborator.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Unexpected streaming host response: {0}")]
    Decode(String),

    #[error("Playback signing error: {0}")]
    Signing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HostError::Http(e) => e.is_timeout() || e.is_connect(),
            HostError::HttpStatus { status, .. } => {
                status.as_u16() == 429 || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum MediaToolError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} reported success but produced no output at {path}")]
    MissingOutput { tool: String, path: PathBuf },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum TaggingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Unparseable tagging response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Stored row is invalid: {0}")]
    InvalidRow(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
