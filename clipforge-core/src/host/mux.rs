use std::{fmt, future::Future, path::Path, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Body, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{AssetDetails, StreamingHost, UploadSlot};
use crate::error::HostError;
use crate::retry::DelaySchedule;
use crate::types::{AssetId, PlaybackId, RecordId, UploadHandle};

const DEFAULT_BASE_URL: &str = "https://api.mux.com";
const DEFAULT_CREATOR: &str = "Admin";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    /// Origin allowed to PUT to direct-upload URLs.
    pub cors_origin: String,
    /// Total deadline for one API call. Proxy uploads are not bound by it.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated on an open connection, uploads included.
    pub read_timeout_secs: u64,
    /// Optional total deadline for one proxy upload.
    pub upload_timeout_secs: Option<u64>,
    /// Retries after the first failed call, for retryable failures only.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_id: String::new(),
            token_secret: String::new(),
            cors_origin: "*".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            read_timeout_secs: 120,
            upload_timeout_secs: None,
            max_retries: 3,
            retry_base_ms: 2_000,
            retry_max_ms: 30_000,
        }
    }
}

impl fmt::Debug for MuxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxConfig")
            .field("base_url", &self.base_url)
            .field("token_id", &self.token_id)
            .field("token_secret", &"<redacted>")
            .field("cors_origin", &self.cors_origin)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Mux-compatible REST client.
pub struct MuxClient {
    http: reqwest::Client,
    config: MuxConfig,
    request_timeout: Duration,
    backoff: DelaySchedule,
}

impl fmt::Debug for MuxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxClient")
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    asset_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaybackIdData {
    id: String,
    #[serde(default)]
    policy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordingTimeData {
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AssetData {
    status: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    playback_ids: Vec<PlaybackIdData>,
    #[serde(default)]
    recording_times: Vec<RecordingTimeData>,
}

impl AssetData {
    fn details(&self) -> AssetDetails {
        if self.status != "ready" {
            return AssetDetails::default();
        }
        AssetDetails {
            duration_sec: self.duration.filter(|d| *d > 0.0),
            recording_started_at: self.recording_times.iter().map(|t| t.started_at).min(),
        }
    }

    /// Prefers a signed playback id; falls back to any.
    fn playback_id(&self) -> Option<PlaybackId> {
        self.playback_ids
            .iter()
            .find(|p| p.policy.as_deref() == Some("signed"))
            .or_else(|| self.playback_ids.first())
            .and_then(|p| PlaybackId::new(p.id.clone()))
    }
}

impl MuxClient {
    pub fn new(config: MuxConfig) -> Result<Self, HostError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let backoff = DelaySchedule::exponential(
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
        );
        Ok(Self {
            http,
            config,
            request_timeout,
            backoff,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Authenticated API call bounded by `request_timeout_secs`.
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.config.token_id, Some(&self.config.token_secret))
            .timeout(self.request_timeout)
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, HostError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HostError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries && err.is_retryable() => {
                    let delay = self.backoff.delay_after(attempt);
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "streaming host call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HostError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::HttpStatus {
                status,
                url: response.url().to_string(),
            });
        }
        let body = response.bytes().await?;
        decode_envelope(&body)
    }

    async fn fetch_asset(&self, asset_id: &AssetId) -> Result<AssetData, HostError> {
        let url = self.endpoint(&format!("/video/v1/assets/{asset_id}"));
        self.with_retries("get_asset", || {
            self.send_json(self.authed(self.http.get(&url)))
        })
        .await
    }

    async fn create_playback_id(&self, asset_id: &AssetId) -> Result<PlaybackId, HostError> {
        let url = self.endpoint(&format!("/video/v1/assets/{asset_id}/playback-ids"));
        let created: PlaybackIdData = self
            .with_retries("create_playback_id", || {
                self.send_json(
                    self.authed(self.http.post(&url))
                        .json(&json!({ "policy": "signed" })),
                )
            })
            .await?;
        PlaybackId::new(created.id)
            .ok_or_else(|| HostError::Decode("empty playback id in create response".into()))
    }

    async fn put_file(&self, url: &str, path: &Path) -> Result<(), HostError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let mut request = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        if let Some(secs) = self.config.upload_timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, HostError> {
    serde_json::from_slice::<Envelope<T>>(body)
        .map(|envelope| envelope.data)
        .map_err(|e| HostError::Decode(e.to_string()))
}

fn upload_request_body(
    record_id: RecordId,
    title: &str,
    creator_id: Option<&str>,
    cors_origin: &str,
) -> serde_json::Value {
    json!({
        "cors_origin": cors_origin,
        "new_asset_settings": {
            "playback_policy": ["signed"],
            "passthrough": record_id.to_string(),
            "meta": {
                "title": title,
                "creator_id": creator_id.filter(|c| !c.trim().is_empty()).unwrap_or(DEFAULT_CREATOR),
                "external_id": record_id.to_string(),
            }
        }
    })
}

#[async_trait]
impl StreamingHost for MuxClient {
    async fn create_upload(
        &self,
        record_id: RecordId,
        title: &str,
        creator_id: Option<&str>,
    ) -> Result<UploadSlot, HostError> {
        let url = self.endpoint("/video/v1/uploads");
        let body = upload_request_body(record_id, title, creator_id, &self.config.cors_origin);

        let upload: UploadData = self
            .with_retries("create_upload", || {
                self.send_json(self.authed(self.http.post(&url)).json(&body))
            })
            .await?;

        let handle = UploadHandle::new(upload.id)
            .ok_or_else(|| HostError::Decode("empty upload id".into()))?;
        let url = upload
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| HostError::Decode("upload response carried no url".into()))?;

        debug!(%record_id, upload = %handle, "created direct upload");
        Ok(UploadSlot { url, handle })
    }

    async fn upload_file(&self, slot: &UploadSlot, path: &Path) -> Result<(), HostError> {
        self.with_retries("upload_file", || self.put_file(&slot.url, path))
            .await
    }

    async fn resolve_asset_id(
        &self,
        handle: &UploadHandle,
    ) -> Result<Option<AssetId>, HostError> {
        let url = self.endpoint(&format!("/video/v1/uploads/{handle}"));
        let upload: UploadData = self
            .with_retries("get_upload", || {
                self.send_json(self.authed(self.http.get(&url)))
            })
            .await?;
        Ok(upload.asset_id.and_then(AssetId::new))
    }

    async fn get_asset_details(&self, asset_id: &AssetId) -> Result<AssetDetails, HostError> {
        Ok(self.fetch_asset(asset_id).await?.details())
    }

    async fn ensure_playback_id(&self, asset_id: &AssetId) -> Result<PlaybackId, HostError> {
        if let Some(existing) = self.fetch_asset(asset_id).await?.playback_id() {
            return Ok(existing);
        }
        match self.create_playback_id(asset_id).await {
            Ok(created) => Ok(created),
            // Another writer may have created one between our read and write.
            Err(HostError::HttpStatus { status, .. }) if status == StatusCode::CONFLICT => self
                .fetch_asset(asset_id)
                .await?
                .playback_id()
                .ok_or_else(|| HostError::Decode("conflict without playback id".into())),
            Err(err) => Err(err),
        }
    }
}
