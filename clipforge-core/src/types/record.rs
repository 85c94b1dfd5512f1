use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ids::{AssetId, CollectionId, PlaybackId, RecordId, UploadHandle};

/// Where a stored recording timestamp came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// File modification time reported by the uploading browser.
    Client,
    /// Recording time read from the asset's own metadata by the streaming host.
    Host,
}

impl TimestampSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampSource::Client => "client",
            TimestampSource::Host => "host",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "client" => Some(TimestampSource::Client),
            "host" => Some(TimestampSource::Host),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingTime {
    pub at: DateTime<Utc>,
    pub source: TimestampSource,
}

impl RecordingTime {
    pub fn client(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Client,
        }
    }

    pub fn host(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Host,
        }
    }

    /// Whether `incoming` may replace `current`.
    ///
    /// Host values supersede client values; a host value, once stored, is never
    /// replaced.
    pub fn supersedes(incoming: &RecordingTime, current: Option<&RecordingTime>) -> bool {
        match current {
            None => true,
            Some(current) => {
                current.source == TimestampSource::Client
                    && incoming.source == TimestampSource::Host
            }
        }
    }

    /// Best-effort parse of a browser-reported modification time.
    ///
    /// Accepts RFC 3339, RFC 2822, and Unix epoch milliseconds
    /// (`File.lastModified`). Anything else yields `None`.
    pub fn parse_client(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let parsed = DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_rfc2822(raw))
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                raw.parse::<i64>()
                    .ok()
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            });

        if parsed.is_none() {
            debug!(value = raw, "ignoring unparseable client last-modified value");
        }

        parsed.map(RecordingTime::client)
    }
}

/// Derived lifecycle state of an ingest record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Draft,
    Uploading,
    AssetResolved,
    Ready,
}

/// A single uploaded video and everything learned about it so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestRecord {
    pub id: RecordId,
    pub collection_id: CollectionId,
    pub title: String,
    pub price_cents: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub upload_handle: Option<UploadHandle>,
    pub asset_id: Option<AssetId>,
    pub playback_id: Option<PlaybackId>,
    pub duration_sec: Option<f64>,
    pub recording_started_at: Option<RecordingTime>,
    pub master_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IngestRecord {
    pub fn new(
        id: RecordId,
        collection_id: CollectionId,
        title: impl Into<String>,
        price_cents: i64,
    ) -> Self {
        Self {
            id,
            collection_id,
            title: title.into(),
            price_cents,
            tags: Vec::new(),
            upload_handle: None,
            asset_id: None,
            playback_id: None,
            duration_sec: None,
            recording_started_at: None,
            master_key: None,
            thumbnail_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        if self.playback_id.is_some() && self.duration_sec.is_some() {
            LifecycleState::Ready
        } else if self.asset_id.is_some() {
            LifecycleState::AssetResolved
        } else if self.upload_handle.is_some() {
            LifecycleState::Uploading
        } else {
            LifecycleState::Draft
        }
    }

    /// A record the healer should look at: published but never made playable,
    /// or resolved without a recording timestamp.
    pub fn needs_healing(&self) -> bool {
        (self.upload_handle.is_some() && self.playback_id.is_none())
            || (self.asset_id.is_some() && self.recording_started_at.is_none())
    }

    /// Nothing left for the healer to learn about this record.
    pub fn is_fully_resolved(&self) -> bool {
        self.playback_id.is_some() && self.recording_started_at.is_some()
    }

    pub fn set_asset_id(&mut self, asset_id: AssetId) {
        if self.asset_id.is_none() {
            self.asset_id = Some(asset_id);
        }
    }

    pub fn set_playback_id(&mut self, playback_id: PlaybackId) {
        if self.playback_id.is_none() {
            self.playback_id = Some(playback_id);
        }
    }

    pub fn set_duration(&mut self, duration_sec: f64) {
        if self.duration_sec.is_none() && duration_sec > 0.0 {
            self.duration_sec = Some(duration_sec);
        }
    }

    /// Returns `true` when the stored timestamp changed.
    pub fn offer_recording_time(&mut self, incoming: RecordingTime) -> bool {
        if RecordingTime::supersedes(&incoming, self.recording_started_at.as_ref()) {
            self.recording_started_at = Some(incoming);
            true
        } else {
            false
        }
    }

    /// Fold `incoming` into `self` without regressing any resolved field.
    ///
    /// Host-derived fields only move from empty to a value. Editable fields
    /// (title, price, tags) follow the incoming record.
    pub fn merge_from(&mut self, incoming: &IngestRecord) {
        self.title.clone_from(&incoming.title);
        self.price_cents = incoming.price_cents;
        self.tags.clone_from(&incoming.tags);

        if self.upload_handle.is_none() {
            self.upload_handle.clone_from(&incoming.upload_handle);
        }
        if let Some(asset_id) = &incoming.asset_id {
            self.set_asset_id(asset_id.clone());
        }
        if let Some(playback_id) = &incoming.playback_id {
            self.set_playback_id(playback_id.clone());
        }
        if let Some(duration) = incoming.duration_sec {
            self.set_duration(duration);
        }
        if let Some(time) = incoming.recording_started_at {
            self.offer_recording_time(time);
        }
        if self.master_key.is_none() {
            self.master_key.clone_from(&incoming.master_key);
        }
        if self.thumbnail_key.is_none() {
            self.thumbnail_key.clone_from(&incoming.thumbnail_key);
        }
    }
}
