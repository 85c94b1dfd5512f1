use axum::{
    Json,
    extract::{Path, Query, State},
};
use clipforge_core::{
    CollectionId, IngestRecord, LifecycleState, RecordId, host::PlaybackAudience,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: IngestRecord,
    pub state: LifecycleState,
    pub healing: bool,
}

#[derive(Debug, Serialize)]
pub struct CollectionRecordsResponse {
    pub collection_id: CollectionId,
    pub records: Vec<RecordView>,
    pub healing_started: usize,
    pub healing_active: usize,
}

/// Records of one collection, newest first.
///
/// Viewing a collection also starts healing for any record in it that was
/// left incomplete.
pub async fn list_collection_records_handler(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
) -> AppResult<Json<CollectionRecordsResponse>> {
    let collection_id = CollectionId(collection_id);
    if !state.store().collection_exists(collection_id).await? {
        return Err(AppError::not_found(format!(
            "Unknown collection: {collection_id}"
        )));
    }

    let records = state.store().list_by_collection(collection_id).await?;
    let report = state.healing().heal(&records);

    let records = records
        .into_iter()
        .map(|record| view(&state, record))
        .collect();

    Ok(Json(CollectionRecordsResponse {
        collection_id,
        records,
        healing_started: report.started.len(),
        healing_active: report.started.len() + report.already_active.len(),
    }))
}

pub async fn get_record_handler(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> AppResult<Json<RecordView>> {
    let record = load_record(&state, RecordId(record_id)).await?;
    Ok(Json(view(&state, record)))
}

#[derive(Debug, Deserialize)]
pub struct PlaybackTokenQuery {
    #[serde(default = "default_audience")]
    pub audience: PlaybackAudience,
    pub max_resolution: Option<String>,
}

fn default_audience() -> PlaybackAudience {
    PlaybackAudience::Video
}

#[derive(Debug, Serialize)]
pub struct PlaybackTokenResponse {
    pub playback_id: String,
    pub audience: PlaybackAudience,
    pub token: String,
}

/// Signed token for a record's playback id.
pub async fn playback_token_handler(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Query(query): Query<PlaybackTokenQuery>,
) -> AppResult<Json<PlaybackTokenResponse>> {
    let Some(signer) = state.signer.as_ref() else {
        return Err(AppError::service_unavailable(
            "Playback signing is not configured",
        ));
    };

    let record = load_record(&state, RecordId(record_id)).await?;
    let Some(playback_id) = record.playback_id else {
        return Err(AppError::not_found(format!(
            "Record {record_id} is not playable yet"
        )));
    };

    let token = signer.sign(&playback_id, query.audience, query.max_resolution.as_deref())?;
    Ok(Json(PlaybackTokenResponse {
        playback_id: playback_id.to_string(),
        audience: query.audience,
        token,
    }))
}

async fn load_record(state: &AppState, record_id: RecordId) -> AppResult<IngestRecord> {
    state
        .store()
        .get(record_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Record not found: {record_id}")))
}

fn view(state: &AppState, record: IngestRecord) -> RecordView {
    RecordView {
        state: record.state(),
        healing: state.healing().is_active(record.id),
        record,
    }
}
