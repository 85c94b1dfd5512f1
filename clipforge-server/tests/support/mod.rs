#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum_test::TestServer;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{TimeZone, Utc};
use clipforge_core::{
    AssetId, CollectionId, HostError, IngestRecord, MediaToolError, Pipeline, PipelineConfig,
    PlaybackId, ProxyProfile, RecordId, UploadHandle,
    host::{AssetDetails, PlaybackSigner, SigningConfig, StreamingHost, UploadSlot},
    ingest::IngestCollaborators,
    media::{FrameExtractor, Transcoder},
    notify::{BroadcastNotifier, StatusNotifier},
    storage::FsObjectStore,
    store::{InMemoryRecordStore, RecordStore},
};
use clipforge_server::{AppState, create_app, infra::config::Config};
use tempfile::TempDir;

pub const SIGNING_KEY_PEM: &str = include_str!("../../../clipforge-core/tests/fixtures/signing_key.pem");
pub const SIGNING_PUB_PEM: &str =
    include_str!("../../../clipforge-core/tests/fixtures/signing_key.pub.pem");

/// Resolves every upload on the first poll.
#[derive(Debug, Default)]
pub struct InstantHost;

#[async_trait]
impl StreamingHost for InstantHost {
    async fn create_upload(
        &self,
        record_id: RecordId,
        _title: &str,
        _creator_id: Option<&str>,
    ) -> Result<UploadSlot, HostError> {
        Ok(UploadSlot {
            url: format!("https://upload.test/{record_id}"),
            handle: UploadHandle::new(format!("up-{record_id}")).expect("handle"),
        })
    }

    async fn upload_file(&self, _slot: &UploadSlot, _path: &Path) -> Result<(), HostError> {
        Ok(())
    }

    async fn resolve_asset_id(
        &self,
        handle: &UploadHandle,
    ) -> Result<Option<AssetId>, HostError> {
        Ok(AssetId::new(format!("asset-{handle}")))
    }

    async fn get_asset_details(&self, _asset_id: &AssetId) -> Result<AssetDetails, HostError> {
        Ok(AssetDetails {
            duration_sec: Some(5.0),
            recording_started_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single(),
        })
    }

    async fn ensure_playback_id(&self, _asset_id: &AssetId) -> Result<PlaybackId, HostError> {
        Ok(PlaybackId::new("pb-1").expect("playback id"))
    }
}

/// Writes a placeholder output, or fails like a corrupt input would.
#[derive(Debug, Default)]
pub struct FakeFfmpeg {
    pub fail_transcode: AtomicBool,
}

impl FakeFfmpeg {
    async fn write(output: &Path, contents: &[u8]) -> Result<(), MediaToolError> {
        tokio::fs::write(output, contents)
            .await
            .map_err(|source| MediaToolError::Spawn {
                tool: "fake-ffmpeg".into(),
                source,
            })
    }
}

#[async_trait]
impl Transcoder for FakeFfmpeg {
    async fn transcode(
        &self,
        _input: &Path,
        output: &Path,
        _profile: &ProxyProfile,
    ) -> Result<(), MediaToolError> {
        if self.fail_transcode.load(Ordering::SeqCst) {
            return Err(MediaToolError::NonZeroExit {
                tool: "fake-ffmpeg".into(),
                code: 1,
                stderr: "Invalid data found when processing input".into(),
            });
        }
        Self::write(output, b"proxy-bytes").await
    }
}

#[async_trait]
impl FrameExtractor for FakeFfmpeg {
    async fn extract_frame(
        &self,
        _input: &Path,
        _offset: Duration,
        output: &Path,
    ) -> Result<(), MediaToolError> {
        Self::write(output, b"jpeg-bytes").await
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub store: Arc<InMemoryRecordStore>,
    pub ffmpeg: Arc<FakeFfmpeg>,
    pub collection_id: CollectionId,
    pub scratch: TempDir,
    _objects: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_signing() -> Self {
        Self::build(true)
    }

    fn build(signing: bool) -> Self {
        let scratch = TempDir::new().expect("scratch dir");
        let objects = TempDir::new().expect("objects dir");

        let mut config = Config::default();
        config.pipeline = fast_pipeline(scratch.path());
        config.host.signing = SigningConfig {
            key_id: "key-1".into(),
            private_key_base64: STANDARD.encode(SIGNING_KEY_PEM),
            ..SigningConfig::default()
        };

        let store = Arc::new(InMemoryRecordStore::new());
        let collection_id = CollectionId::new();
        store.insert_collection(collection_id, "Track day");

        let ffmpeg = Arc::new(FakeFfmpeg::default());
        let notifier = BroadcastNotifier::new();
        let parts = IngestCollaborators {
            store: store.clone(),
            host: Arc::new(InstantHost),
            objects: Arc::new(FsObjectStore::new(objects.path())),
            transcoder: ffmpeg.clone(),
            frames: ffmpeg.clone(),
            tagger: None,
        };
        let pipeline = Pipeline::new(
            parts,
            Arc::new(notifier.clone()) as Arc<dyn StatusNotifier>,
            &config.pipeline,
        );
        let signer = if signing {
            PlaybackSigner::from_config(&config.host.signing).expect("signing key")
        } else {
            None
        };

        let state = AppState::new(pipeline, notifier, signer, config);
        let server = TestServer::new(create_app(state.clone())).expect("test server");

        Self {
            server,
            state,
            store,
            ffmpeg,
            collection_id,
            scratch,
            _objects: objects,
        }
    }

    /// A record published to the host whose resolver never finished.
    pub async fn seed_uploading(&self) -> IngestRecord {
        let mut record = IngestRecord::new(RecordId::new(), self.collection_id, "lap.mp4", 1_500);
        record.upload_handle = UploadHandle::new("up-seeded");
        self.store.add(&record).await.expect("seed record");
        record
    }

    /// Upload directories still present under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn record(&self, record_id: RecordId) -> Option<IngestRecord> {
        self.store.get(record_id).await.expect("store get")
    }
}

fn fast_pipeline(scratch_root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ingest.scratch_root = scratch_root.to_path_buf();
    config.resolver.asset_poll_interval_ms = 2;
    config.resolver.asset_poll_attempts = 5;
    config.resolver.details_poll_interval_ms = 2;
    config.resolver.details_poll_attempts = 5;
    config.healing.max_rounds = 6;
    config.healing.fast_delay_ms = 2;
    config.healing.medium_delay_ms = 3;
    config.healing.slow_delay_ms = 5;
    config
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
