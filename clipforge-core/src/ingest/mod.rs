//! Upload ingestion: stage once, fan out three units of work, fan in,
//! persist, and hand off to the resolver.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{FatalIngestError, IngestError, ValidationError};
use crate::host::StreamingHost;
use crate::media::{FrameExtractor, Transcoder};
use crate::resolver::MetadataResolver;
use crate::storage::{ObjectStore, content_type_for, master_key, thumbnail_key};
use crate::store::RecordStore;
use crate::tagging::FrameTagger;
use crate::types::{CollectionId, IngestRecord, RecordId, RecordingTime, UploadHandle};

const SOURCE_STEM: &str = "source";
const THUMBNAIL_FILE: &str = "thumbnail.jpg";
const PROXY_STEM: &str = "proxy";

/// An upload written to its own scratch directory.
///
/// The bytes live under a fixed internal name so derived files in the same
/// directory cannot collide with the client's file name. The directory is
/// removed when the last holder drops it.
pub struct StagedUpload {
    dir: Option<TempDir>,
    path: PathBuf,
    file_name: String,
    bytes: u64,
}

impl fmt::Debug for StagedUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedUpload")
            .field("path", &self.path)
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl StagedUpload {
    /// Location of the staged bytes inside the scratch directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitized client file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn scratch_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(path = %path.display(), error = %err, "failed to remove scratch directory");
            }
        }
    }
}

/// Caller-supplied metadata for one upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub collection_id: Option<CollectionId>,
    pub price_cents: i64,
    /// Defaults to the uploaded file name.
    pub title: Option<String>,
    pub uploader_id: Option<String>,
    /// Browser-reported modification time of the source file.
    pub last_modified: Option<String>,
}

/// Returned once the record is persisted; resolution is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub record_id: RecordId,
    pub original_bytes: u64,
    pub proxy_bytes: u64,
    pub compression_secs: f64,
}

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct IngestCollaborators {
    pub store: Arc<dyn RecordStore>,
    pub host: Arc<dyn StreamingHost>,
    pub objects: Arc<dyn ObjectStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub frames: Arc<dyn FrameExtractor>,
    pub tagger: Option<Arc<dyn FrameTagger>>,
}

struct Published {
    handle: UploadHandle,
    proxy_bytes: u64,
    compression_secs: f64,
}

#[derive(Default)]
struct Thumbnail {
    key: Option<String>,
    tags: Vec<String>,
}

#[derive(Clone)]
pub struct IngestOrchestrator {
    parts: IngestCollaborators,
    resolver: MetadataResolver,
    config: IngestConfig,
}

impl fmt::Debug for IngestOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestOrchestrator")
            .field("config", &self.config)
            .field("tagging", &self.parts.tagger.is_some())
            .finish_non_exhaustive()
    }
}

/// Keeps only the final path component; rejects names that are empty or
/// refer to a directory.
fn sanitize_file_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(ValidationError::InvalidFileName(raw.to_string()));
    }
    Ok(name.to_string())
}

/// `source.<ext>`, keeping a short alphanumeric extension for tools that
/// sniff the container from it.
fn staged_file_name(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{SOURCE_STEM}.{}", ext.to_ascii_lowercase()),
        None => SOURCE_STEM.to_string(),
    }
}

fn proxy_file_name(suffix: &str) -> String {
    format!("{PROXY_STEM}{suffix}.mp4")
}

impl IngestOrchestrator {
    pub fn new(parts: IngestCollaborators, resolver: MetadataResolver, config: IngestConfig) -> Self {
        Self {
            parts,
            resolver,
            config,
        }
    }

    /// Write `reader` to a fresh scratch directory.
    pub async fn stage<R>(&self, file_name: &str, mut reader: R) -> Result<StagedUpload, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let file_name = sanitize_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.config.scratch_root).await?;
        let dir = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.config.scratch_root)?;
        let path = dir.path().join(staged_file_name(&file_name));

        let mut file = tokio::fs::File::create(&path).await?;
        let bytes = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        let staged = StagedUpload {
            dir: Some(dir),
            path,
            file_name,
            bytes,
        };
        if staged.bytes == 0 {
            return Err(ValidationError::EmptyUpload.into());
        }
        debug!(file = %staged.file_name, bytes, "staged upload");
        Ok(staged)
    }

    /// Stage then ingest.
    pub async fn ingest_stream<R>(
        &self,
        file_name: &str,
        reader: R,
        request: IngestRequest,
    ) -> Result<IngestReceipt, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let staged = self.stage(file_name, reader).await?;
        self.ingest(staged, request).await
    }

    /// Reject a missing or unregistered collection.
    pub async fn ensure_collection(
        &self,
        collection_id: Option<CollectionId>,
    ) -> Result<CollectionId, IngestError> {
        let collection_id = collection_id.ok_or(ValidationError::MissingCollection)?;
        if !self.parts.store.collection_exists(collection_id).await? {
            return Err(ValidationError::UnknownCollection(collection_id).into());
        }
        Ok(collection_id)
    }

    /// Validate, then publish and persist on a task of its own.
    ///
    /// Once validation passes the upload runs to completion even if the
    /// caller is dropped, so a published proxy always ends in a stored record
    /// and a running resolver.
    pub async fn ingest(
        &self,
        staged: StagedUpload,
        request: IngestRequest,
    ) -> Result<IngestReceipt, IngestError> {
        if staged.bytes == 0 {
            return Err(ValidationError::EmptyUpload.into());
        }
        let collection_id = self.ensure_collection(request.collection_id).await?;

        let record_id = RecordId::new();
        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| staged.file_name.clone());

        info!(
            %record_id,
            %collection_id,
            file = %staged.file_name,
            bytes = staged.bytes,
            "ingesting upload"
        );

        let accepted = tokio::spawn(self.clone().complete(
            staged,
            collection_id,
            record_id,
            title,
            request,
        ));
        match accepted.await {
            Ok(result) => result,
            Err(err) => {
                warn!(%record_id, error = %err, "ingest task failed");
                Err(FatalIngestError::TaskPanicked("ingest").into())
            }
        }
    }

    async fn complete(
        self,
        staged: StagedUpload,
        collection_id: CollectionId,
        record_id: RecordId,
        title: String,
        request: IngestRequest,
    ) -> Result<IngestReceipt, IngestError> {
        let original_bytes = staged.bytes;
        let staged = Arc::new(staged);

        let archive = tokio::spawn(self.clone().archive(Arc::clone(&staged), collection_id, record_id));
        let thumbnail = tokio::spawn(self.clone().thumbnail(Arc::clone(&staged), record_id));
        let publish = tokio::spawn(self.clone().publish(
            Arc::clone(&staged),
            record_id,
            title.clone(),
            request.uploader_id.clone(),
        ));

        let (archive, thumbnail, publish) = tokio::join!(archive, thumbnail, publish);
        drop(staged);

        let master_key = archive.unwrap_or_else(|err| {
            warn!(%record_id, error = %err, "archive task failed");
            None
        });
        let thumbnail = thumbnail.unwrap_or_else(|err| {
            warn!(%record_id, error = %err, "thumbnail task failed");
            Thumbnail::default()
        });
        let published = match publish {
            Ok(result) => result?,
            Err(err) => {
                warn!(%record_id, error = %err, "publish task failed");
                return Err(FatalIngestError::TaskPanicked("compress_publish").into());
            }
        };

        let mut record = IngestRecord::new(record_id, collection_id, title, request.price_cents);
        record.upload_handle = Some(published.handle);
        record.master_key = master_key;
        record.thumbnail_key = thumbnail.key;
        record.tags = thumbnail.tags;
        if let Some(time) = request
            .last_modified
            .as_deref()
            .and_then(RecordingTime::parse_client)
        {
            record.offer_recording_time(time);
        }

        self.parts.store.add(&record).await?;
        self.resolver.spawn(record_id);

        info!(
            %record_id,
            original_bytes,
            proxy_bytes = published.proxy_bytes,
            compression_secs = published.compression_secs,
            "upload accepted; resolution continues in background"
        );

        Ok(IngestReceipt {
            record_id,
            original_bytes,
            proxy_bytes: published.proxy_bytes,
            compression_secs: published.compression_secs,
        })
    }

    async fn archive(
        self,
        staged: Arc<StagedUpload>,
        collection_id: CollectionId,
        record_id: RecordId,
    ) -> Option<String> {
        if !self.config.archive_masters {
            return None;
        }
        let key = master_key(collection_id, record_id, &staged.file_name);
        match self
            .parts
            .objects
            .upload(&staged.path, &key, content_type_for(&staged.file_name))
            .await
        {
            Ok(key) => {
                debug!(%record_id, key, "archived master");
                Some(key)
            }
            Err(err) => {
                warn!(%record_id, error = %err, "archiving master failed; continuing");
                None
            }
        }
    }

    async fn thumbnail(self, staged: Arc<StagedUpload>, record_id: RecordId) -> Thumbnail {
        let frame = staged.scratch_dir().join(THUMBNAIL_FILE);
        if let Err(err) = self
            .parts
            .frames
            .extract_frame(&staged.path, self.config.thumbnail_offset(), &frame)
            .await
        {
            warn!(%record_id, error = %err, "thumbnail extraction failed; continuing");
            return Thumbnail::default();
        }

        let key = match self
            .parts
            .objects
            .upload(&frame, &thumbnail_key(record_id), "image/jpeg")
            .await
        {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(%record_id, error = %err, "thumbnail upload failed; continuing");
                None
            }
        };

        let tags = match &self.parts.tagger {
            Some(tagger) => match tokio::fs::read(&frame).await {
                Ok(jpeg) => tagger.analyze(jpeg.into()).await.unwrap_or_else(|err| {
                    warn!(%record_id, error = %err, "frame tagging failed; continuing");
                    Vec::new()
                }),
                Err(err) => {
                    warn!(%record_id, error = %err, "could not read thumbnail for tagging");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Thumbnail { key, tags }
    }

    async fn publish(
        self,
        staged: Arc<StagedUpload>,
        record_id: RecordId,
        title: String,
        uploader_id: Option<String>,
    ) -> Result<Published, FatalIngestError> {
        let profile = &self.config.proxy;
        let proxy = staged
            .scratch_dir()
            .join(proxy_file_name(&profile.file_suffix()));

        let started = Instant::now();
        self.parts
            .transcoder
            .transcode(&staged.path, &proxy, profile)
            .await?;
        let compression_secs = started.elapsed().as_secs_f64();
        let proxy_bytes = tokio::fs::metadata(&proxy)
            .await
            .map(|meta| meta.len())
            .unwrap_or_default();

        let slot = self
            .parts
            .host
            .create_upload(record_id, &title, uploader_id.as_deref())
            .await?;
        self.parts.host.upload_file(&slot, &proxy).await?;

        debug!(%record_id, upload = %slot.handle, proxy_bytes, "proxy published");
        Ok(Published {
            handle: slot.handle,
            proxy_bytes,
            compression_secs,
        })
    }
}
