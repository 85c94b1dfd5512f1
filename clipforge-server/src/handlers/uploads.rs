use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
};
use clipforge_core::{
    CollectionId, ValidationError,
    ingest::{IngestReceipt, IngestRequest, StagedUpload},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

const DEFAULT_UPLOAD_NAME: &str = "upload.mp4";

/// Admin upload of a single video.
///
/// The `file` part is written to scratch storage as it arrives; the other
/// parts may appear in any order. A `collection_id` sent ahead of the file is
/// checked before any file bytes are read; otherwise the staged file is
/// discarded as soon as the collection is rejected.
pub async fn upload_video_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<IngestReceipt>> {
    let mut staged: Option<StagedUpload> = None;
    let mut request = IngestRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => staged = Some(stage_file(&state, field).await?),
            "collection_id" => {
                let raw = read_text(field).await?;
                let collection_id = CollectionId::parse_required(Some(raw.as_str()))?;
                state
                    .orchestrator()
                    .ensure_collection(Some(collection_id))
                    .await?;
                request.collection_id = Some(collection_id);
            }
            "price_cents" => {
                let raw = read_text(field).await?;
                request.price_cents = parse_price(&raw)?;
            }
            "title" => request.title = Some(read_text(field).await?),
            "uploader_id" => request.uploader_id = non_blank(read_text(field).await?),
            "last_modified" => request.last_modified = non_blank(read_text(field).await?),
            other => debug!(field = other, "ignoring unknown upload field"),
        }
    }

    let staged = staged.ok_or(ValidationError::EmptyUpload)?;
    if request.collection_id.is_none() {
        return Err(ValidationError::MissingCollection.into());
    }

    let receipt = state.orchestrator().ingest(staged, request).await?;
    info!(
        record_id = %receipt.record_id,
        original_bytes = receipt.original_bytes,
        proxy_bytes = receipt.proxy_bytes,
        "upload ingested"
    );
    Ok(Json(receipt))
}

async fn stage_file(state: &AppState, field: Field<'_>) -> AppResult<StagedUpload> {
    let file_name = field
        .file_name()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
    let body = field.map_err(std::io::Error::other);
    let reader = StreamReader::new(body);
    tokio::pin!(reader);
    Ok(state.orchestrator().stage(&file_name, reader).await?)
}

async fn read_text(field: Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("Invalid form field: {e}")))
}

fn parse_price(raw: &str) -> AppResult<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    match raw.parse::<i64>() {
        Ok(price) if price >= 0 => Ok(price),
        _ => Err(AppError::bad_request(format!("Invalid price_cents: {raw:?}"))),
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
