use std::sync::Arc;

use anyhow::{Context, Result};
use clipforge_core::{
    Pipeline,
    host::{MuxClient, PlaybackSigner, StreamingHost},
    ingest::IngestCollaborators,
    media::FfmpegCli,
    notify::{BroadcastNotifier, StatusNotifier},
    storage::{FsObjectStore, ObjectStore, S3ObjectStore},
    store::{InMemoryRecordStore, PostgresRecordStore, RecordStore},
    tagging::{FrameTagger, VisionTagger},
};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::infra::{
    app_state::AppState,
    config::{Config, StorageBackend},
};

/// Wire production collaborators from configuration.
///
/// `in_memory` forces the in-memory record store even when a database URL
/// is configured.
pub async fn build_state(config: Config, in_memory: bool) -> Result<AppState> {
    let store = connect_store(&config, in_memory).await?;
    let host: Arc<dyn StreamingHost> = Arc::new(
        MuxClient::new(config.host.api.clone()).context("failed to build streaming host client")?,
    );
    let signer = PlaybackSigner::from_config(&config.host.signing)
        .context("invalid playback signing configuration")?;
    if signer.is_none() {
        warn!("playback signing is not configured; token requests will be refused");
    }

    let objects: Arc<dyn ObjectStore> = match config.storage.backend {
        StorageBackend::Fs => {
            info!(root = %config.storage.root.display(), "using filesystem object storage");
            Arc::new(FsObjectStore::new(config.storage.root.clone()))
        }
        StorageBackend::S3 => {
            info!(bucket = %config.storage.s3.bucket, "using S3 object storage");
            Arc::new(
                S3ObjectStore::from_config(&config.storage.s3)
                    .await
                    .context("failed to configure S3 object storage")?,
            )
        }
    };

    let ffmpeg = Arc::new(FfmpegCli::new(config.media.ffmpeg_path.clone()));
    let tagger = VisionTagger::from_config(config.tagging.clone())
        .context("failed to configure frame tagging")?
        .map(|tagger| Arc::new(tagger) as Arc<dyn FrameTagger>);

    let notifier = BroadcastNotifier::new();
    let parts = IngestCollaborators {
        store,
        host,
        objects,
        transcoder: ffmpeg.clone(),
        frames: ffmpeg,
        tagger,
    };
    let pipeline = Pipeline::new(
        parts,
        Arc::new(notifier.clone()) as Arc<dyn StatusNotifier>,
        &config.pipeline,
    );

    Ok(AppState::new(pipeline, notifier, signer, config))
}

async fn connect_store(config: &Config, in_memory: bool) -> Result<Arc<dyn RecordStore>> {
    let url = match config.database.url.as_deref() {
        Some(url) if !in_memory => url,
        _ => {
            warn!("no database configured; records are kept in memory and lost on restart");
            let store = InMemoryRecordStore::new();
            for seed in &config.database.collections {
                store.insert_collection(seed.id, seed.name.clone());
            }
            return Ok(Arc::new(store));
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    clipforge_core::MIGRATOR
        .run(&pool)
        .await
        .context("failed to run database migrations")?;
    info!("database migrations applied");

    let store = PostgresRecordStore::new(pool);
    for seed in &config.database.collections {
        store
            .upsert_collection(seed.id, &seed.name)
            .await
            .with_context(|| format!("failed to register collection {}", seed.id))?;
    }
    Ok(Arc::new(store))
}

/// Work done once the state exists and before the listener accepts
/// connections.
pub async fn run_startup_hooks(state: &AppState) {
    let healing = &state.config.pipeline.healing;
    if !healing.sweep_on_startup {
        return;
    }

    let report = state.healing().sweep().await;
    info!(
        started = report.started.len(),
        already_active = report.already_active.len(),
        healthy = report.healthy,
        "startup healing sweep complete"
    );
}
