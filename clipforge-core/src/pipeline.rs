use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::healing::HealingService;
use crate::ingest::{IngestCollaborators, IngestOrchestrator};
use crate::notify::StatusNotifier;
use crate::resolver::MetadataResolver;

/// The orchestrator, resolver and healing service wired to one set of
/// collaborators.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub orchestrator: IngestOrchestrator,
    pub resolver: MetadataResolver,
    pub healing: HealingService,
}

impl Pipeline {
    pub fn new(
        parts: IngestCollaborators,
        notifier: Arc<dyn StatusNotifier>,
        config: &PipelineConfig,
    ) -> Self {
        let resolver = MetadataResolver::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.host),
            notifier,
            config.resolver,
        );
        let healing = HealingService::new(resolver.clone(), config.healing);
        let orchestrator = IngestOrchestrator::new(parts, resolver.clone(), config.ingest.clone());
        Self {
            orchestrator,
            resolver,
            healing,
        }
    }
}
