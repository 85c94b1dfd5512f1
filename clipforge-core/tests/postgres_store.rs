#![cfg(feature = "database")]

use chrono::{Duration, Utc};
use clipforge_core::{
    AssetId, CollectionId, IngestRecord, PlaybackId, RecordId, RecordingTime, StoreError,
    TimestampSource, UploadHandle,
    store::{PostgresRecordStore, RecordStore},
};
use sqlx::PgPool;

async fn store_with_collection(pool: PgPool) -> (PostgresRecordStore, CollectionId) {
    let store = PostgresRecordStore::new(pool);
    let collection = CollectionId::new();
    store
        .upsert_collection(collection, "Track day")
        .await
        .expect("collection");
    (store, collection)
}

fn uploading(collection: CollectionId) -> IngestRecord {
    let mut record = IngestRecord::new(RecordId::new(), collection, "lap.mp4", 2_500);
    record.upload_handle = UploadHandle::new("up-1");
    record.tags = vec!["Car".into(), "Red".into()];
    record
}

#[sqlx::test(migrator = "clipforge_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn add_and_get_round_trip(pool: PgPool) {
    let (store, collection) = store_with_collection(pool).await;
    let mut record = uploading(collection);
    record.offer_recording_time(RecordingTime::client(Utc::now() - Duration::days(1)));
    store.add(&record).await.expect("add");

    let loaded = store.get(record.id).await.expect("get").expect("exists");
    assert_eq!(loaded.tags, record.tags);
    assert_eq!(loaded.upload_handle, record.upload_handle);
    assert_eq!(
        loaded.recording_started_at.map(|t| t.source),
        Some(TimestampSource::Client)
    );

    assert!(matches!(
        store.add(&record).await,
        Err(StoreError::Conflict(_))
    ));
}

#[sqlx::test(migrator = "clipforge_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn stale_update_does_not_regress_row(pool: PgPool) {
    let (store, collection) = store_with_collection(pool).await;
    let record = uploading(collection);
    store.add(&record).await.expect("add");

    let mut resolved = record.clone();
    resolved.set_asset_id(AssetId::new("asset-1").expect("asset"));
    resolved.set_playback_id(PlaybackId::new("pb-1").expect("pb"));
    resolved.set_duration(5.0);
    store.update(&resolved).await.expect("resolve");

    let merged = store.update(&record).await.expect("stale update");
    assert_eq!(merged.playback_id.as_ref().map(|p| p.as_str()), Some("pb-1"));
    assert_eq!(merged.duration_sec, Some(5.0));
    assert_eq!(merged.asset_id.as_ref().map(|a| a.as_str()), Some("asset-1"));
}

#[sqlx::test(migrator = "clipforge_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn recording_time_is_never_downgraded(pool: PgPool) {
    let (store, collection) = store_with_collection(pool).await;
    let mut record = uploading(collection);
    let client_at = Utc::now() - Duration::days(2);
    record.offer_recording_time(RecordingTime::client(client_at));
    store.add(&record).await.expect("add");

    let host_at = Utc::now() - Duration::days(3);
    let mut with_host = record.clone();
    with_host.recording_started_at = Some(RecordingTime::host(host_at));
    let merged = store.update(&with_host).await.expect("host time");
    let stored = merged.recording_started_at.expect("time");
    assert_eq!(stored.source, TimestampSource::Host);
    assert_eq!(stored.at.timestamp(), host_at.timestamp());

    let mut other_host = record.clone();
    other_host.recording_started_at = Some(RecordingTime::host(Utc::now()));
    let merged = store.update(&other_host).await.expect("second host time");
    assert_eq!(
        merged.recording_started_at.map(|t| t.at.timestamp()),
        Some(host_at.timestamp())
    );
}

#[sqlx::test(migrator = "clipforge_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn lists_unresolved_and_checks_collections(pool: PgPool) {
    let (store, collection) = store_with_collection(pool).await;
    store.add(&uploading(collection)).await.expect("add broken");

    let mut healthy = uploading(collection);
    healthy.set_asset_id(AssetId::new("a").expect("asset"));
    healthy.set_playback_id(PlaybackId::new("p").expect("pb"));
    healthy.offer_recording_time(RecordingTime::host(Utc::now()));
    store.add(&healthy).await.expect("add healthy");

    assert_eq!(store.list_unresolved(10).await.expect("unresolved").len(), 1);
    assert_eq!(
        store.list_by_collection(collection).await.expect("list").len(),
        2
    );
    assert!(store.collection_exists(collection).await.expect("exists"));
    assert!(!store.collection_exists(CollectionId::new()).await.expect("exists"));
}
