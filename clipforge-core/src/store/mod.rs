//! Durable persistence for ingest records.
//!
//! Every store applies the same monotonic merge on update: host-resolved
//! fields only move from empty to a value, and recording time follows
//! [`RecordingTime::supersedes`](crate::types::RecordingTime::supersedes).
//! Writers holding a stale copy therefore cannot regress a record.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{CollectionId, IngestRecord, RecordId};

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::InMemoryRecordStore;
#[cfg(feature = "database")]
pub use postgres::PostgresRecordStore;

/// Implementations are shared handles (`Arc<dyn RecordStore>`) usable from
/// any task; nothing is scoped to a request.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: RecordId) -> Result<Option<IngestRecord>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the id already exists.
    async fn add(&self, record: &IngestRecord) -> Result<(), StoreError>;

    /// Merge `record` into the stored row and return the merged result.
    async fn update(&self, record: &IngestRecord) -> Result<IngestRecord, StoreError>;

    /// Newest first.
    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<IngestRecord>, StoreError>;

    /// Records matching the healing predicate, newest first.
    async fn list_unresolved(&self, limit: u32) -> Result<Vec<IngestRecord>, StoreError>;

    async fn collection_exists(&self, collection_id: CollectionId) -> Result<bool, StoreError>;
}
