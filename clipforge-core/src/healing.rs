//! Background repair of records left incomplete by resolver timeouts or
//! restarts.
//!
//! The registry is the one shared mutable structure in the pipeline. An entry
//! is inserted atomically before its task may start and removed by a guard
//! owned by the task, so every exit path (success, exhaustion, panic, abort)
//! frees the slot.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::HealingConfig;
use crate::resolver::{MetadataResolver, ResolvedDetails};
use crate::retry::{Attempt, PollOutcome, PollPolicy, poll_until};
use crate::task::spawn_detached;
use crate::types::{IngestRecord, RecordId, RecordStatus};

/// A live repair task. At most one exists per record id.
#[derive(Debug)]
pub struct HealingTask {
    pub record_id: RecordId,
    pub started_at: DateTime<Utc>,
}

/// What a [`HealingService::heal`] call did with its candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealingReport {
    pub started: Vec<RecordId>,
    pub already_active: Vec<RecordId>,
    /// Candidates that did not need healing.
    pub healthy: usize,
}

type Registry = Arc<DashMap<RecordId, HealingTask>>;

/// Removes the registry entry when the owning task ends, however it ends.
struct RegistryLease {
    registry: Registry,
    record_id: RecordId,
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.registry.remove(&self.record_id);
    }
}

enum HealResult {
    AlreadyResolved,
    Repaired(ResolvedDetails),
}

/// Owns the healing registry. Clones share it.
#[derive(Clone)]
pub struct HealingService {
    resolver: MetadataResolver,
    config: HealingConfig,
    registry: Registry,
}

impl fmt::Debug for HealingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealingService")
            .field("config", &self.config)
            .field("active", &self.registry.len())
            .finish()
    }
}

impl HealingService {
    pub fn new(resolver: MetadataResolver, config: HealingConfig) -> Self {
        Self {
            resolver,
            config,
            registry: Arc::new(DashMap::new()),
        }
    }

    /// Number of repair tasks currently registered.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_active(&self, record_id: RecordId) -> bool {
        self.registry.contains_key(&record_id)
    }

    /// Start a repair task for every broken record that has none running.
    pub fn heal(&self, records: &[IngestRecord]) -> HealingReport {
        let mut report = HealingReport::default();
        for record in records {
            if !record.needs_healing() {
                report.healthy += 1;
                continue;
            }
            if self.try_start(record.id) {
                report.started.push(record.id);
            } else {
                report.already_active.push(record.id);
            }
        }

        if !report.started.is_empty() {
            info!(
                started = report.started.len(),
                already_active = report.already_active.len(),
                "healing tasks started"
            );
        }
        report
    }

    /// Load unresolved records from the store and heal them.
    pub async fn sweep(&self) -> HealingReport {
        match self
            .resolver
            .store()
            .list_unresolved(self.config.sweep_limit)
            .await
        {
            Ok(records) => {
                info!(candidates = records.len(), "healing sweep");
                self.heal(&records)
            }
            Err(err) => {
                warn!(error = %err, "failed to load unresolved records for healing sweep");
                HealingReport::default()
            }
        }
    }

    fn try_start(&self, record_id: RecordId) -> bool {
        let slot = match self.registry.entry(record_id) {
            Entry::Occupied(_) => {
                debug!(%record_id, "healing already active");
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let (start_tx, start_rx) = oneshot::channel::<()>();
        let lease = RegistryLease {
            registry: Arc::clone(&self.registry),
            record_id,
        };
        let resolver = self.resolver.clone();
        let policy = self.config.policy();

        spawn_detached("healing_task", async move {
            let _lease = lease;
            // The entry must be in the registry before the task can finish
            // and remove it.
            if start_rx.await.is_err() {
                return;
            }
            heal_record(&resolver, &policy, record_id).await;
        });

        slot.insert(HealingTask {
            record_id,
            started_at: Utc::now(),
        });
        let _ = start_tx.send(());
        true
    }
}

async fn heal_record(resolver: &MetadataResolver, policy: &PollPolicy, record_id: RecordId) {
    let max_rounds = policy.max_attempts();
    debug!(%record_id, max_rounds, "healing record");

    match poll_until(policy, |round| heal_round(resolver, record_id, round, max_rounds)).await {
        PollOutcome::Resolved {
            value: HealResult::Repaired(details),
            attempts,
        } => {
            if details.changed {
                resolver.notifier().broadcast(record_id, RecordStatus::Healed);
            }
            info!(%record_id, rounds = attempts, changed = details.changed, "record healed");
        }
        PollOutcome::Resolved {
            value: HealResult::AlreadyResolved,
            attempts,
        } => {
            debug!(%record_id, rounds = attempts, "record already resolved elsewhere");
        }
        PollOutcome::Exhausted { attempts } => {
            warn!(%record_id, rounds = attempts, "healing gave up; record stays eligible");
        }
        PollOutcome::Abandoned { attempts } => {
            debug!(%record_id, rounds = attempts, "healing abandoned; record is gone");
        }
    }
}

async fn heal_round(
    resolver: &MetadataResolver,
    record_id: RecordId,
    round: u32,
    max_rounds: u32,
) -> Attempt<HealResult> {
    let record = match resolver.store().get(record_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Attempt::Abandon,
        Err(err) => {
            warn!(%record_id, round = round + 1, error = %err, "healing could not load record");
            return Attempt::Pending;
        }
    };

    if record.is_fully_resolved() {
        return Attempt::Ready(HealResult::AlreadyResolved);
    }

    let asset_id = match record.asset_id {
        Some(asset_id) => asset_id,
        None => {
            let Some(handle) = record.upload_handle else {
                return Attempt::Abandon;
            };
            match resolver
                .probe_asset_id(record_id, &handle, round, max_rounds)
                .await
            {
                Attempt::Ready(asset_id) => {
                    if let Err(err) = resolver.persist_asset_id(record_id, &asset_id).await {
                        warn!(%record_id, error = %err, "failed to persist healed asset id");
                    }
                    asset_id
                }
                Attempt::Pending => return Attempt::Pending,
                Attempt::Abandon => return Attempt::Abandon,
            }
        }
    };

    match resolver
        .probe_details(record_id, &asset_id, round, max_rounds)
        .await
    {
        Attempt::Ready(details) => Attempt::Ready(HealResult::Repaired(details)),
        Attempt::Pending => Attempt::Pending,
        Attempt::Abandon => Attempt::Abandon,
    }
}
