use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;

use super::RecordStore;
use crate::error::StoreError;
use crate::types::{CollectionId, IngestRecord, RecordId};

/// Process-local store for development and tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<RecordId, IngestRecord>,
    collections: DashMap<CollectionId, String>,
}

impl fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("records", &self.records.len())
            .field("collections", &self.collections.len())
            .finish()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_collection(&self, collection_id: CollectionId, name: impl Into<String>) {
        self.collections.insert(collection_id, name.into());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn newest_first(records: &mut [IngestRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: RecordId) -> Result<Option<IngestRecord>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn add(&self, record: &IngestRecord) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(record.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, record: &IngestRecord) -> Result<IngestRecord, StoreError> {
        let mut stored = self
            .records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;
        stored.merge_from(record);
        Ok(stored.clone())
    }

    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<IngestRecord>, StoreError> {
        let mut records: Vec<IngestRecord> = self
            .records
            .iter()
            .filter(|entry| entry.collection_id == collection_id)
            .map(|entry| entry.value().clone())
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn list_unresolved(&self, limit: u32) -> Result<Vec<IngestRecord>, StoreError> {
        let mut records: Vec<IngestRecord> = self
            .records
            .iter()
            .filter(|entry| entry.needs_healing())
            .map(|entry| entry.value().clone())
            .collect();
        newest_first(&mut records);
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn collection_exists(&self, collection_id: CollectionId) -> Result<bool, StoreError> {
        Ok(self.collections.contains_key(&collection_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, PlaybackId, RecordingTime, UploadHandle};
    use chrono::Utc;

    fn uploading(collection: CollectionId) -> IngestRecord {
        let mut record = IngestRecord::new(RecordId::new(), collection, "clip.mp4", 900);
        record.upload_handle = UploadHandle::new("up-1");
        record
    }

    #[tokio::test]
    async fn add_rejects_duplicates() {
        let store = InMemoryRecordStore::new();
        let record = uploading(CollectionId::new());
        store.add(&record).await.expect("first add");
        assert!(matches!(
            store.add(&record).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn stale_update_cannot_regress_playback() {
        let store = InMemoryRecordStore::new();
        let record = uploading(CollectionId::new());
        store.add(&record).await.expect("add");

        let mut resolved = record.clone();
        resolved.set_asset_id(AssetId::new("asset-1").expect("asset"));
        resolved.set_playback_id(PlaybackId::new("pb-1").expect("pb"));
        resolved.set_duration(5.0);
        store.update(&resolved).await.expect("resolve");

        // A writer still holding the original copy.
        let merged = store.update(&record).await.expect("stale write");
        assert_eq!(merged.playback_id, resolved.playback_id);
        assert_eq!(merged.duration_sec, Some(5.0));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let record = uploading(CollectionId::new());
        assert!(matches!(
            store.update(&record).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_unresolved_with_limit() {
        let store = InMemoryRecordStore::new();
        let collection = CollectionId::new();

        let mut healthy = uploading(collection);
        healthy.set_asset_id(AssetId::new("a").expect("asset"));
        healthy.set_playback_id(PlaybackId::new("p").expect("pb"));
        healthy.offer_recording_time(RecordingTime::host(Utc::now()));
        store.add(&healthy).await.expect("add healthy");

        for _ in 0..3 {
            store.add(&uploading(collection)).await.expect("add broken");
        }

        assert_eq!(store.list_unresolved(10).await.expect("list").len(), 3);
        assert_eq!(store.list_unresolved(2).await.expect("list").len(), 2);
        assert_eq!(
            store.list_by_collection(collection).await.expect("list").len(),
            4
        );
        assert!(
            store
                .list_by_collection(CollectionId::new())
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn collections_must_be_registered() {
        let store = InMemoryRecordStore::new();
        let collection = CollectionId::new();
        assert!(!store.collection_exists(collection).await.expect("exists"));
        store.insert_collection(collection, "Track day");
        assert!(store.collection_exists(collection).await.expect("exists"));
    }
}
