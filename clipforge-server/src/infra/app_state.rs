use std::{fmt, sync::Arc};

use clipforge_core::{
    Pipeline, healing::HealingService, host::PlaybackSigner, ingest::IngestOrchestrator,
    notify::BroadcastNotifier, store::RecordStore,
};

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Source for `/ws/status` subscriptions; the pipeline publishes into it.
    pub notifier: BroadcastNotifier,
    /// `None` when playback signing is not configured.
    pub signer: Option<Arc<PlaybackSigner>>,
    pub config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("signing", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        notifier: BroadcastNotifier,
        signer: Option<PlaybackSigner>,
        config: Config,
    ) -> Self {
        Self {
            pipeline,
            notifier,
            signer: signer.map(Arc::new),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.pipeline.resolver.store()
    }

    pub fn orchestrator(&self) -> &IngestOrchestrator {
        &self.pipeline.orchestrator
    }

    pub fn healing(&self) -> &HealingService {
        &self.pipeline.healing
    }
}
