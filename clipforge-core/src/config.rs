use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::retry::{DelaySchedule, PollPolicy};

/// Global knobs for the ingestion pipeline.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scratch storage, thumbnail offset, proxy profile, archival.
    pub ingest: IngestConfig,
    /// Two-phase metadata poll budgets.
    pub resolver: ResolverConfig,
    /// Background repair of incomplete records.
    pub healing: HealingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Parent directory for per-upload scratch directories.
    pub scratch_root: PathBuf,
    /// Offset into the source video used for the thumbnail frame.
    pub thumbnail_offset_ms: u64,
    /// Copy the original upload to object storage.
    pub archive_masters: bool,
    /// Low-resolution streaming proxy settings.
    pub proxy: ProxyProfile,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("clipforge-ingest"),
            thumbnail_offset_ms: 1_000,
            archive_masters: true,
            proxy: ProxyProfile::default(),
        }
    }
}

impl IngestConfig {
    pub fn thumbnail_offset(&self) -> Duration {
        Duration::from_millis(self.thumbnail_offset_ms)
    }
}

/// Encoder settings for the streaming proxy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyProfile {
    /// Output height in pixels; width follows the aspect ratio.
    pub height: u32,
    /// x264 constant rate factor.
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
}

impl Default for ProxyProfile {
    fn default() -> Self {
        Self {
            height: 540,
            crf: 28,
            preset: "veryfast".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl ProxyProfile {
    /// Suffix appended to the source file stem, e.g. `_540p`.
    pub fn file_suffix(&self) -> String {
        format!("_{}p", self.height)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Phase 1 (upload handle -> asset id) cadence and budget.
    pub asset_poll_interval_ms: u64,
    pub asset_poll_attempts: u32,
    /// Phase 2 (asset id -> playback id, duration, timestamp) cadence and budget.
    pub details_poll_interval_ms: u64,
    pub details_poll_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            asset_poll_interval_ms: 2_000,
            asset_poll_attempts: 15,
            details_poll_interval_ms: 3_000,
            details_poll_attempts: 20,
        }
    }
}

impl ResolverConfig {
    /// Phase 1 waits before every poll: the host never has an asset id
    /// immediately after the upload completes.
    pub fn asset_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.asset_poll_attempts,
            DelaySchedule::fixed(Duration::from_millis(self.asset_poll_interval_ms)),
        )
        .delay_first(true)
    }

    /// Phase 2 polls immediately and waits between attempts.
    pub fn details_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.details_poll_attempts,
            DelaySchedule::fixed(Duration::from_millis(self.details_poll_interval_ms)),
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Rounds per healing task before it gives up until the next invocation.
    pub max_rounds: u32,
    /// Delay for the first third of rounds.
    pub fast_delay_ms: u64,
    /// Delay for the second third of rounds.
    pub medium_delay_ms: u64,
    /// Delay for the remaining rounds.
    pub slow_delay_ms: u64,
    /// Heal unresolved records found in the store at startup.
    pub sweep_on_startup: bool,
    /// Upper bound on records loaded by the startup sweep.
    pub sweep_limit: u32,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_rounds: 36,
            fast_delay_ms: 2_000,
            medium_delay_ms: 5_000,
            slow_delay_ms: 8_000,
            sweep_on_startup: true,
            sweep_limit: 200,
        }
    }
}

impl HealingConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.max_rounds,
            DelaySchedule::thirds(
                self.max_rounds,
                Duration::from_millis(self.fast_delay_ms),
                Duration::from_millis(self.medium_delay_ms),
                Duration::from_millis(self.slow_delay_ms),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_budgets() {
        let config = PipelineConfig::default();
        assert_eq!(config.resolver.asset_policy().max_attempts(), 15);
        assert_eq!(config.resolver.details_policy().max_attempts(), 20);
        assert_eq!(config.healing.policy().max_attempts(), 36);
        assert_eq!(config.ingest.proxy.file_suffix(), "_540p");
    }

    #[test]
    fn healing_budget_is_roughly_three_minutes() {
        let policy = HealingConfig::default().policy();
        let total: Duration = (0..policy.max_attempts())
            .map(|round| policy.schedule().delay_after(round))
            .sum();
        assert_eq!(total, Duration::from_secs(180));
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"resolver": {"asset_poll_attempts": 3}}"#)
                .expect("parse partial config");
        assert_eq!(config.resolver.asset_poll_attempts, 3);
        assert_eq!(config.resolver.details_poll_attempts, 20);
        assert_eq!(config.healing.max_rounds, 36);
    }
}
