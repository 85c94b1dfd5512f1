#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clipforge_core::{
    CollectionId, HostError, IngestRecord, MediaToolError, PipelineConfig, Pipeline, PlaybackId,
    ProxyProfile, RecordId, RecordStatus, StorageError, TaggingError, UploadHandle,
    host::{AssetDetails, StreamingHost, UploadSlot},
    ingest::IngestCollaborators,
    media::{FrameExtractor, Transcoder},
    notify::StatusNotifier,
    storage::{FsObjectStore, ObjectStore},
    store::{InMemoryRecordStore, RecordStore},
    tagging::FrameTagger,
    types::AssetId,
};
use tempfile::TempDir;

/// Behaviour of [`ScriptedHost`]. Call numbers are 1-based.
#[derive(Debug, Clone)]
pub struct HostScript {
    pub asset_ready_on_call: Option<u32>,
    pub asset_lookup_failures: u32,
    pub details_ready_on_call: Option<u32>,
    pub duration_sec: f64,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub playback_id: String,
    pub fail_create_upload: bool,
    /// Simulates a client bug: `get_asset_details` panics.
    pub panic_on_details: bool,
}

impl Default for HostScript {
    fn default() -> Self {
        Self {
            asset_ready_on_call: Some(1),
            asset_lookup_failures: 0,
            details_ready_on_call: Some(1),
            duration_sec: 5.0,
            recording_started_at: None,
            playback_id: "pb-1".into(),
            fail_create_upload: false,
            panic_on_details: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedHost {
    pub script: Mutex<HostScript>,
    pub create_upload_calls: AtomicU32,
    pub upload_file_calls: AtomicU32,
    pub asset_lookups: AtomicU32,
    pub details_calls: AtomicU32,
    pub ensure_playback_calls: AtomicU32,
}

impl ScriptedHost {
    pub fn new(script: HostScript) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    pub fn script(&self) -> HostScript {
        self.script.lock().expect("script lock").clone()
    }

    pub fn update(&self, edit: impl FnOnce(&mut HostScript)) {
        edit(&mut self.script.lock().expect("script lock"));
    }

    pub fn asset_lookups(&self) -> u32 {
        self.asset_lookups.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> u32 {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn create_upload_calls(&self) -> u32 {
        self.create_upload_calls.load(Ordering::SeqCst)
    }

    pub fn upload_file_calls(&self) -> u32 {
        self.upload_file_calls.load(Ordering::SeqCst)
    }
}

fn scripted_failure() -> HostError {
    HostError::Decode("scripted failure".into())
}

#[async_trait]
impl StreamingHost for ScriptedHost {
    async fn create_upload(
        &self,
        record_id: RecordId,
        _title: &str,
        _creator_id: Option<&str>,
    ) -> Result<UploadSlot, HostError> {
        self.create_upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.script().fail_create_upload {
            return Err(scripted_failure());
        }
        Ok(UploadSlot {
            url: format!("https://upload.test/{record_id}"),
            handle: UploadHandle::new(format!("up-{record_id}")).expect("handle"),
        })
    }

    async fn upload_file(&self, _slot: &UploadSlot, path: &Path) -> Result<(), HostError> {
        self.upload_file_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::metadata(path).await?;
        Ok(())
    }

    async fn resolve_asset_id(
        &self,
        handle: &UploadHandle,
    ) -> Result<Option<AssetId>, HostError> {
        let call = self.asset_lookups.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.script();
        if call <= script.asset_lookup_failures {
            return Err(scripted_failure());
        }
        Ok(match script.asset_ready_on_call {
            Some(ready) if call >= ready => AssetId::new(format!("asset-{handle}")),
            _ => None,
        })
    }

    async fn get_asset_details(&self, _asset_id: &AssetId) -> Result<AssetDetails, HostError> {
        let call = self.details_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.script();
        if script.panic_on_details {
            panic!("asset details client blew up");
        }
        Ok(match script.details_ready_on_call {
            Some(ready) if call >= ready => AssetDetails {
                duration_sec: Some(script.duration_sec),
                recording_started_at: script.recording_started_at,
            },
            _ => AssetDetails::default(),
        })
    }

    async fn ensure_playback_id(&self, _asset_id: &AssetId) -> Result<PlaybackId, HostError> {
        self.ensure_playback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PlaybackId::new(self.script().playback_id).expect("playback id"))
    }
}

pub const JPEG_FRAME: &[u8] = b"\xff\xd8jpeg";

/// Writes a placeholder output file, or fails with a non-zero exit.
///
/// Reads its input after `delay` and keeps what it saw.
#[derive(Debug, Default)]
pub struct FakeMediaTool {
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicU32,
    pub inputs: Mutex<Vec<Vec<u8>>>,
}

impl FakeMediaTool {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().expect("inputs lock").clone()
    }

    async fn run(&self, input: &Path, output: &Path, contents: &[u8]) -> Result<(), MediaToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(seen) = tokio::fs::read(input).await {
            self.inputs.lock().expect("inputs lock").push(seen);
        }
        if self.fail {
            return Err(MediaToolError::NonZeroExit {
                tool: "fake-ffmpeg".into(),
                code: 1,
                stderr: "Invalid data found when processing input".into(),
            });
        }
        tokio::fs::write(output, contents)
            .await
            .map_err(|source| MediaToolError::Spawn {
                tool: "fake-ffmpeg".into(),
                source,
            })
    }
}

#[async_trait]
impl Transcoder for FakeMediaTool {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _profile: &ProxyProfile,
    ) -> Result<(), MediaToolError> {
        self.run(input, output, b"proxy-bytes").await
    }
}

#[async_trait]
impl FrameExtractor for FakeMediaTool {
    async fn extract_frame(
        &self,
        input: &Path,
        _offset: Duration,
        output: &Path,
    ) -> Result<(), MediaToolError> {
        self.run(input, output, JPEG_FRAME).await
    }
}

#[derive(Debug)]
pub struct FakeTagger(pub Vec<String>);

#[async_trait]
impl FrameTagger for FakeTagger {
    async fn analyze(&self, _jpeg: Bytes) -> Result<Vec<String>, TaggingError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default)]
pub struct FailingObjectStore;

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn upload(
        &self,
        _source: &Path,
        _key: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        Err(StorageError::Backend("bucket unavailable".into()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(RecordId, RecordStatus)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(RecordId, RecordStatus)> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.events().iter().filter(|(_, s)| *s == status).count()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn broadcast(&self, record_id: RecordId, status: RecordStatus) {
        self.events.lock().expect("events lock").push((record_id, status));
    }
}

/// Millisecond-scale poll intervals.
pub fn fast_config(scratch: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ingest.scratch_root = scratch.to_path_buf();
    config.ingest.thumbnail_offset_ms = 0;
    config.resolver.asset_poll_interval_ms = 2;
    config.resolver.asset_poll_attempts = 15;
    config.resolver.details_poll_interval_ms = 2;
    config.resolver.details_poll_attempts = 20;
    config.healing.max_rounds = 36;
    config.healing.fast_delay_ms = 2;
    config.healing.medium_delay_ms = 3;
    config.healing.slow_delay_ms = 5;
    config
}

pub struct HarnessBuilder {
    script: HostScript,
    transcoder: FakeMediaTool,
    frames: FakeMediaTool,
    tagger: Option<Vec<String>>,
    failing_objects: bool,
    edit_config: Option<Box<dyn FnOnce(&mut PipelineConfig)>>,
}

impl HarnessBuilder {
    pub fn host(mut self, script: HostScript) -> Self {
        self.script = script;
        self
    }

    pub fn failing_transcoder(mut self) -> Self {
        self.transcoder = FakeMediaTool::failing();
        self
    }

    pub fn slow_transcoder(mut self, delay: Duration) -> Self {
        self.transcoder = FakeMediaTool::slow(delay);
        self
    }

    pub fn failing_frames(mut self) -> Self {
        self.frames = FakeMediaTool::failing();
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tagger = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn failing_objects(mut self) -> Self {
        self.failing_objects = true;
        self
    }

    pub fn config(mut self, edit: impl FnOnce(&mut PipelineConfig) + 'static) -> Self {
        self.edit_config = Some(Box::new(edit));
        self
    }

    pub fn build(self) -> Harness {
        let scratch = tempfile::tempdir().expect("scratch tempdir");
        let objects_root = tempfile::tempdir().expect("objects tempdir");

        let mut config = fast_config(scratch.path());
        if let Some(edit) = self.edit_config {
            edit(&mut config);
        }

        let store = Arc::new(InMemoryRecordStore::new());
        let collection_id = CollectionId::new();
        store.insert_collection(collection_id, "Track day");

        let host = Arc::new(ScriptedHost::new(self.script));
        let transcoder = Arc::new(self.transcoder);
        let frames = Arc::new(self.frames);
        let notifier = Arc::new(RecordingNotifier::default());
        let objects: Arc<dyn ObjectStore> = if self.failing_objects {
            Arc::new(FailingObjectStore)
        } else {
            Arc::new(FsObjectStore::new(objects_root.path()))
        };

        let parts = IngestCollaborators {
            store: store.clone(),
            host: host.clone(),
            objects,
            transcoder: transcoder.clone(),
            frames: frames.clone(),
            tagger: self
                .tagger
                .map(|tags| Arc::new(FakeTagger(tags)) as Arc<dyn FrameTagger>),
        };
        let pipeline = Pipeline::new(parts, notifier.clone(), &config);

        Harness {
            pipeline,
            store,
            host,
            transcoder,
            frames,
            notifier,
            collection_id,
            config,
            scratch,
            objects_root,
        }
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryRecordStore>,
    pub host: Arc<ScriptedHost>,
    pub transcoder: Arc<FakeMediaTool>,
    pub frames: Arc<FakeMediaTool>,
    pub notifier: Arc<RecordingNotifier>,
    pub collection_id: CollectionId,
    pub config: PipelineConfig,
    pub scratch: TempDir,
    pub objects_root: TempDir,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            script: HostScript::default(),
            transcoder: FakeMediaTool::default(),
            frames: FakeMediaTool::default(),
            tagger: None,
            failing_objects: false,
            edit_config: None,
        }
    }

    pub async fn record(&self, id: RecordId) -> IngestRecord {
        self.store
            .get(id)
            .await
            .expect("store get")
            .expect("record exists")
    }

    /// A record as the orchestrator persists it, without starting resolution.
    pub async fn seed_uploading(&self) -> IngestRecord {
        let mut record =
            IngestRecord::new(RecordId::new(), self.collection_id, "seeded.mp4", 1_000);
        record.upload_handle = UploadHandle::new(format!("up-{}", record.id));
        self.store.add(&record).await.expect("seed record");
        record
    }

    /// Wait until the healing registry drains.
    pub async fn healing_idle(&self) {
        eventually("healing registry to drain", || async {
            self.pipeline.healing.active_count() == 0
        })
        .await;
    }
}

/// Poll `check` every few milliseconds for up to five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
