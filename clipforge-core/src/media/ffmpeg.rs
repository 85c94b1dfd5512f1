use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{FrameExtractor, Transcoder};
use crate::config::ProxyProfile;
use crate::error::MediaToolError;

const STDERR_TAIL_LINES: usize = 10;

/// Drives the `ffmpeg` binary as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegCli {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn tool_name(&self) -> String {
        self.ffmpeg_path.display().to_string()
    }

    async fn run(&self, args: Vec<OsString>, output: &Path) -> Result<(), MediaToolError> {
        debug!(tool = %self.ffmpeg_path.display(), ?args, "running media tool");

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaToolError::Spawn {
                tool: self.tool_name(),
                source,
            })?;

        if !result.status.success() {
            return Err(MediaToolError::NonZeroExit {
                tool: self.tool_name(),
                code: result.status.code().unwrap_or(-1),
                stderr: stderr_tail(&result.stderr),
            });
        }

        let produced = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(MediaToolError::MissingOutput {
                tool: self.tool_name(),
                path: output.to_path_buf(),
            });
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn base_args() -> Vec<OsString> {
    ["-y", "-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

pub(crate) fn transcode_args(input: &Path, output: &Path, profile: &ProxyProfile) -> Vec<OsString> {
    let mut args = base_args();
    args.push("-i".into());
    args.push(input.into());
    for arg in [
        "-vf".to_string(),
        format!("scale=-2:{}", profile.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-crf".to_string(),
        profile.crf.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

pub(crate) fn frame_args(input: &Path, offset: Duration, output: &Path) -> Vec<OsString> {
    let mut args = base_args();
    args.push("-ss".into());
    args.push(format!("{:.3}", offset.as_secs_f64()).into());
    args.push("-i".into());
    args.push(input.into());
    for arg in ["-frames:v", "1", "-q:v", "2"] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

#[async_trait]
impl Transcoder for FfmpegCli {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &ProxyProfile,
    ) -> Result<(), MediaToolError> {
        let started = std::time::Instant::now();
        self.run(transcode_args(input, output, profile), output).await?;
        info!(
            input = %input.display(),
            height = profile.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built streaming proxy"
        );
        Ok(())
    }
}

#[async_trait]
impl FrameExtractor for FfmpegCli {
    async fn extract_frame(
        &self,
        input: &Path,
        offset: Duration,
        output: &Path,
    ) -> Result<(), MediaToolError> {
        self.run(frame_args(input, offset, output), output).await
    }
}
