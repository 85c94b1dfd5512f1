use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use super::RecordStore;
use crate::error::StoreError;
use crate::types::{
    AssetId, CollectionId, IngestRecord, PlaybackId, RecordId, RecordingTime, TimestampSource,
    UploadHandle,
};

const RECORD_COLUMNS: &str = "id, collection_id, title, price_cents, tags, upload_handle, \
    asset_id, playback_id, duration_sec, recording_started_at, recording_source, master_key, \
    thumbnail_key, created_at";

/// The UPDATE applies the same monotonic merge as `IngestRecord::merge_from`.
/// All right-hand sides read the pre-update row.
const MERGE_UPDATE: &str = r#"
    UPDATE ingest_records SET
        title = $2,
        price_cents = $3,
        tags = $4,
        upload_handle = COALESCE(upload_handle, $5),
        asset_id = COALESCE(asset_id, $6),
        playback_id = COALESCE(playback_id, $7),
        duration_sec = COALESCE(duration_sec, CASE WHEN $8::float8 > 0 THEN $8::float8 END),
        recording_started_at = CASE
            WHEN $9::timestamptz IS NULL THEN recording_started_at
            WHEN recording_started_at IS NULL THEN $9::timestamptz
            WHEN recording_source = 'client' AND $10::text = 'host' THEN $9::timestamptz
            ELSE recording_started_at
        END,
        recording_source = CASE
            WHEN $9::timestamptz IS NULL THEN recording_source
            WHEN recording_started_at IS NULL THEN $10::text
            WHEN recording_source = 'client' AND $10::text = 'host' THEN $10::text
            ELSE recording_source
        END,
        master_key = COALESCE(master_key, $11),
        thumbnail_key = COALESCE(thumbnail_key, $12),
        updated_at = NOW()
    WHERE id = $1
    RETURNING id, collection_id, title, price_cents, tags, upload_handle, asset_id, playback_id,
        duration_sec, recording_started_at, recording_source, master_key, thumbnail_key,
        created_at
"#;

#[derive(Clone, Debug)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent; used by deployments and tests that seed collections.
    pub async fn upsert_collection(
        &self,
        collection_id: CollectionId,
        name: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO collections (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(collection_id.as_uuid())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Result<IngestRecord, StoreError> {
    let recording_at: Option<DateTime<Utc>> = row.try_get("recording_started_at")?;
    let recording_source: Option<String> = row.try_get("recording_source")?;
    let recording_started_at = match (recording_at, recording_source.as_deref()) {
        (Some(at), Some(source)) => {
            let source = TimestampSource::parse(source).ok_or_else(|| {
                StoreError::InvalidRow(format!("unknown recording_source {source:?}"))
            })?;
            Some(RecordingTime { at, source })
        }
        _ => None,
    };
    let tags: Json<Vec<String>> = row.try_get("tags")?;

    Ok(IngestRecord {
        id: RecordId(row.try_get::<Uuid, _>("id")?),
        collection_id: CollectionId(row.try_get::<Uuid, _>("collection_id")?),
        title: row.try_get("title")?,
        price_cents: row.try_get("price_cents")?,
        tags: tags.0,
        upload_handle: row
            .try_get::<Option<String>, _>("upload_handle")?
            .and_then(UploadHandle::new),
        asset_id: row
            .try_get::<Option<String>, _>("asset_id")?
            .and_then(AssetId::new),
        playback_id: row
            .try_get::<Option<String>, _>("playback_id")?
            .and_then(PlaybackId::new),
        duration_sec: row.try_get("duration_sec")?,
        recording_started_at,
        master_key: row.try_get("master_key")?,
        thumbnail_key: row.try_get("thumbnail_key")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get(&self, id: RecordId) -> Result<Option<IngestRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM ingest_records WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn add(&self, record: &IngestRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingest_records (
                id, collection_id, title, price_cents, tags, upload_handle, asset_id,
                playback_id, duration_sec, recording_started_at, recording_source,
                master_key, thumbnail_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.collection_id.as_uuid())
        .bind(&record.title)
        .bind(record.price_cents)
        .bind(Json(&record.tags))
        .bind(record.upload_handle.as_ref().map(|h| h.as_str()))
        .bind(record.asset_id.as_ref().map(|a| a.as_str()))
        .bind(record.playback_id.as_ref().map(|p| p.as_str()))
        .bind(record.duration_sec)
        .bind(record.recording_started_at.map(|t| t.at))
        .bind(record.recording_started_at.map(|t| t.source.as_str()))
        .bind(record.master_key.as_deref())
        .bind(record.thumbnail_key.as_deref())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(record.id.to_string()));
        }
        Ok(())
    }

    async fn update(&self, record: &IngestRecord) -> Result<IngestRecord, StoreError> {
        let row = sqlx::query(MERGE_UPDATE)
            .bind(record.id.as_uuid())
            .bind(&record.title)
            .bind(record.price_cents)
            .bind(Json(&record.tags))
            .bind(record.upload_handle.as_ref().map(|h| h.as_str()))
            .bind(record.asset_id.as_ref().map(|a| a.as_str()))
            .bind(record.playback_id.as_ref().map(|p| p.as_str()))
            .bind(record.duration_sec)
            .bind(record.recording_started_at.map(|t| t.at))
            .bind(record.recording_started_at.map(|t| t.source.as_str()))
            .bind(record.master_key.as_deref())
            .bind(record.thumbnail_key.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;
        row_to_record(&row)
    }

    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<IngestRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM ingest_records
             WHERE collection_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(collection_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn list_unresolved(&self, limit: u32) -> Result<Vec<IngestRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM ingest_records
             WHERE (upload_handle IS NOT NULL AND playback_id IS NULL)
                OR (asset_id IS NOT NULL AND recording_started_at IS NULL)
             ORDER BY created_at DESC
             LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn collection_exists(&self, collection_id: CollectionId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM collections WHERE id = $1)")
                .bind(collection_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
