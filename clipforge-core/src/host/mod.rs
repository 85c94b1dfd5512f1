//! Streaming host collaborator: upload slots, asset resolution, playback ids.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HostError;
use crate::types::{AssetId, PlaybackId, RecordId, UploadHandle};

pub mod mux;
pub mod signing;

pub use mux::{MuxClient, MuxConfig};
pub use signing::{PlaybackAudience, PlaybackSigner, SigningConfig};

/// A direct-upload slot issued by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSlot {
    pub url: String,
    pub handle: UploadHandle,
}

/// What the host currently knows about an asset.
///
/// Both fields stay empty until the host has finished processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetDetails {
    pub duration_sec: Option<f64>,
    pub recording_started_at: Option<DateTime<Utc>>,
}

impl AssetDetails {
    /// The duration, once the host reports a positive one.
    pub fn processed_duration(&self) -> Option<f64> {
        self.duration_sec.filter(|d| *d > 0.0)
    }
}

/// Every call either answers or fails; background callers treat a failure
/// as "no answer this attempt".
#[async_trait]
pub trait StreamingHost: Send + Sync {
    async fn create_upload(
        &self,
        record_id: RecordId,
        title: &str,
        creator_id: Option<&str>,
    ) -> Result<UploadSlot, HostError>;

    /// Transmit the file at `path` to a slot returned by [`create_upload`].
    ///
    /// [`create_upload`]: StreamingHost::create_upload
    async fn upload_file(&self, slot: &UploadSlot, path: &Path) -> Result<(), HostError>;

    async fn resolve_asset_id(
        &self,
        handle: &UploadHandle,
    ) -> Result<Option<AssetId>, HostError>;

    async fn get_asset_details(&self, asset_id: &AssetId) -> Result<AssetDetails, HostError>;

    /// Returns the existing playback id, creating one when the asset has none.
    async fn ensure_playback_id(&self, asset_id: &AssetId) -> Result<PlaybackId, HostError>;
}
