//! External media tooling: proxy transcoding and frame extraction.

use std::{path::Path, time::Duration};

use async_trait::async_trait;

use crate::config::ProxyProfile;
use crate::error::MediaToolError;

pub mod ffmpeg;

pub use ffmpeg::FfmpegCli;

/// Success means the tool exited zero and `output` exists and is non-empty.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &ProxyProfile,
    ) -> Result<(), MediaToolError>;
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_frame(
        &self,
        input: &Path,
        offset: Duration,
        output: &Path,
    ) -> Result<(), MediaToolError>;
}
