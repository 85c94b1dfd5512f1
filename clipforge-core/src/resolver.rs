//! Two-phase reconciliation of host-side metadata.
//!
//! Phase 1 turns an upload handle into an asset id. Phase 2 waits for the
//! asset to finish processing, then records duration, the host's recording
//! time, and a playback id. Both phases are bounded; exhaustion leaves the
//! record in a state the healing service can pick up later.

use std::{fmt, sync::Arc};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::StoreError;
use crate::host::StreamingHost;
use crate::notify::StatusNotifier;
use crate::retry::{Attempt, PollOutcome, poll_until};
use crate::store::RecordStore;
use crate::task::spawn_detached;
use crate::types::{
    AssetId, IngestRecord, RecordId, RecordStatus, RecordingTime, UploadHandle,
};

/// How a resolution run ended. None of these are errors for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Playback id and duration are stored.
    Ready(IngestRecord),
    /// Phase 2 ran out of attempts; the asset id is stored.
    AssetResolved,
    /// Phase 1 ran out of attempts, or there was no upload handle.
    Unresolved,
    /// The record no longer exists.
    Missing,
}

/// A successful phase-2 probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDetails {
    pub record: IngestRecord,
    /// Whether this probe stored anything new.
    pub changed: bool,
}

/// Cheap to clone; every clone shares the same collaborators.
#[derive(Clone)]
pub struct MetadataResolver {
    store: Arc<dyn RecordStore>,
    host: Arc<dyn StreamingHost>,
    notifier: Arc<dyn StatusNotifier>,
    config: ResolverConfig,
}

impl fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MetadataResolver {
    /// The resolver keeps its own handles; nothing it holds is tied to the
    /// request that triggered it.
    pub fn new(
        store: Arc<dyn RecordStore>,
        host: Arc<dyn StreamingHost>,
        notifier: Arc<dyn StatusNotifier>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            host,
            notifier,
            config,
        }
    }

    /// Store shared with the healing service.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn StatusNotifier> {
        &self.notifier
    }

    /// Run [`resolve`](Self::resolve) as a detached task.
    pub fn spawn(&self, record_id: RecordId) -> JoinHandle<()> {
        let resolver = self.clone();
        spawn_detached("metadata_resolver", async move {
            resolver.resolve(record_id).await;
        })
    }

    /// Run both phases for `record_id`, skipping phase 1 when the asset id is
    /// already stored. Never fails; the outcome says where it stopped.
    pub async fn resolve(&self, record_id: RecordId) -> ResolutionOutcome {
        let record = match self.store.get(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%record_id, "record vanished before resolution started");
                return ResolutionOutcome::Missing;
            }
            Err(err) => {
                warn!(%record_id, error = %err, "failed to load record for resolution");
                return ResolutionOutcome::Unresolved;
            }
        };

        let asset_id = match record.asset_id.clone() {
            Some(asset_id) => asset_id,
            None => match self.run_asset_phase(&record).await {
                Some(asset_id) => asset_id,
                None => return ResolutionOutcome::Unresolved,
            },
        };

        self.run_details_phase(record_id, &asset_id).await
    }

    async fn run_asset_phase(&self, record: &IngestRecord) -> Option<AssetId> {
        let record_id = record.id;
        let Some(handle) = record.upload_handle.clone() else {
            warn!(%record_id, "record has no upload handle; nothing to resolve");
            return None;
        };

        let policy = self.config.asset_policy();
        let max_attempts = policy.max_attempts();
        debug!(%record_id, upload = %handle, max_attempts, "resolving asset id");

        match poll_until(&policy, |attempt| {
            self.probe_asset_id(record_id, &handle, attempt, max_attempts)
        })
        .await
        {
            PollOutcome::Resolved { value, attempts } => {
                info!(%record_id, asset_id = %value, attempts, "asset id resolved");
                if let Err(err) = self.persist_asset_id(record_id, &value).await {
                    warn!(%record_id, error = %err, "failed to persist asset id; continuing");
                }
                Some(value)
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(
                    %record_id,
                    attempts,
                    "asset id not available within budget; record stays uploading"
                );
                None
            }
            PollOutcome::Abandoned { .. } => None,
        }
    }

    async fn run_details_phase(&self, record_id: RecordId, asset_id: &AssetId) -> ResolutionOutcome {
        let policy = self.config.details_policy();
        let max_attempts = policy.max_attempts();
        debug!(%record_id, %asset_id, max_attempts, "waiting for asset details");

        match poll_until(&policy, |attempt| {
            self.probe_details(record_id, asset_id, attempt, max_attempts)
        })
        .await
        {
            PollOutcome::Resolved { value, attempts } => {
                info!(%record_id, %asset_id, attempts, "record ready for playback");
                self.notifier.broadcast(record_id, RecordStatus::Ready);
                ResolutionOutcome::Ready(value.record)
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(
                    %record_id,
                    %asset_id,
                    attempts,
                    "asset details not available within budget; leaving record for healing"
                );
                if let Err(err) = self.persist_asset_id(record_id, asset_id).await {
                    warn!(%record_id, error = %err, "failed to persist partial resolution");
                }
                ResolutionOutcome::AssetResolved
            }
            PollOutcome::Abandoned { .. } => ResolutionOutcome::Missing,
        }
    }

    /// One phase-1 poll. Host failures count as "not yet".
    pub async fn probe_asset_id(
        &self,
        record_id: RecordId,
        handle: &UploadHandle,
        attempt: u32,
        max_attempts: u32,
    ) -> Attempt<AssetId> {
        match self.host.resolve_asset_id(handle).await {
            Ok(Some(asset_id)) => Attempt::Ready(asset_id),
            Ok(None) => {
                debug!(%record_id, attempt = attempt + 1, max_attempts, "asset id not yet available");
                Attempt::Pending
            }
            Err(err) => {
                warn!(
                    %record_id,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    "asset id lookup failed"
                );
                Attempt::Pending
            }
        }
    }

    /// One phase-2 poll. Ready once duration and playback id are stored.
    pub async fn probe_details(
        &self,
        record_id: RecordId,
        asset_id: &AssetId,
        attempt: u32,
        max_attempts: u32,
    ) -> Attempt<ResolvedDetails> {
        let details = match self.host.get_asset_details(asset_id).await {
            Ok(details) => details,
            Err(err) => {
                warn!(
                    %record_id,
                    %asset_id,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    "asset details lookup failed"
                );
                return Attempt::Pending;
            }
        };

        let Some(duration) = details.processed_duration() else {
            debug!(%record_id, attempt = attempt + 1, max_attempts, "asset still processing");
            return Attempt::Pending;
        };

        let host_time = details.recording_started_at.map(RecordingTime::host);
        let first = self
            .apply(record_id, |record| {
                let mut changed = record.asset_id.is_none() || record.duration_sec.is_none();
                record.set_asset_id(asset_id.clone());
                record.set_duration(duration);
                if let Some(time) = host_time {
                    changed |= record.offer_recording_time(time);
                }
                changed
            })
            .await;
        let changed_details = match first {
            Ok(Some((_, changed))) => changed,
            Ok(None) => return Attempt::Abandon,
            Err(err) => {
                warn!(%record_id, error = %err, "failed to persist asset details");
                return Attempt::Pending;
            }
        };

        let playback_id = match self.host.ensure_playback_id(asset_id).await {
            Ok(playback_id) => playback_id,
            Err(err) => {
                warn!(%record_id, %asset_id, error = %err, "failed to ensure playback id");
                return Attempt::Pending;
            }
        };

        match self
            .apply(record_id, |record| {
                let changed = record.playback_id.is_none();
                record.set_playback_id(playback_id);
                changed
            })
            .await
        {
            Ok(Some((record, changed_playback))) => Attempt::Ready(ResolvedDetails {
                record,
                changed: changed_details || changed_playback,
            }),
            Ok(None) => Attempt::Abandon,
            Err(err) => {
                warn!(%record_id, error = %err, "failed to persist playback id");
                Attempt::Pending
            }
        }
    }

    /// Store `asset_id` unless the record already carries one.
    pub(crate) async fn persist_asset_id(
        &self,
        record_id: RecordId,
        asset_id: &AssetId,
    ) -> Result<Option<IngestRecord>, StoreError> {
        self.apply(record_id, |record| {
            record.set_asset_id(asset_id.clone());
            true
        })
        .await
        .map(|applied| applied.map(|(record, _)| record))
    }

    /// Re-read the record, mutate it, and write it back through the store's
    /// monotonic merge. `Ok(None)` when the record no longer exists.
    async fn apply<F>(
        &self,
        record_id: RecordId,
        mutate: F,
    ) -> Result<Option<(IngestRecord, bool)>, StoreError>
    where
        F: FnOnce(&mut IngestRecord) -> bool,
    {
        let Some(mut record) = self.store.get(record_id).await? else {
            return Ok(None);
        };
        let changed = mutate(&mut record);
        match self.store.update(&record).await {
            Ok(merged) => Ok(Some((merged, changed))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
