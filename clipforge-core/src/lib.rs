//! # Clipforge Core
//!
//! Asynchronous video ingestion and metadata reconciliation against an
//! external streaming host.
//!
//! ## Overview
//!
//! - **Ingestion**: [`ingest::IngestOrchestrator`] stages an upload once, then
//!   archives it, extracts a thumbnail, and publishes a low-resolution proxy
//!   concurrently before persisting the record.
//! - **Resolution**: [`resolver::MetadataResolver`] polls the host in two
//!   bounded phases (upload handle to asset id, asset id to playback details).
//! - **Healing**: [`healing::HealingService`] repairs records left incomplete,
//!   with at most one repair task per record in this process.
//! - **Persistence**: [`store::RecordStore`] merges writes monotonically so a
//!   resolved field never regresses.
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL record store (SQLx)
//! - `s3`: S3-compatible object storage adapter

pub mod config;
pub mod error;
pub mod healing;
pub mod host;
pub mod ingest;
pub mod media;
pub mod notify;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod store;
pub mod tagging;
pub mod task;
pub mod types;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use config::{HealingConfig, IngestConfig, PipelineConfig, ProxyProfile, ResolverConfig};
pub use error::{
    FatalIngestError, HostError, IngestError, MediaToolError, Result, StorageError, StoreError,
    TaggingError, ValidationError,
};
pub use pipeline::Pipeline;
pub use types::*;
