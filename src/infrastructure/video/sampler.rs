//! Video Sampler
//!
//! Samples frames from a clip at an approximate target rate by striding
//! source frames, using ffprobe for stream metadata and ffmpeg for
//! extraction. Frames are emitted as JPEGs in frame order.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::gateways::{GatewayError, GatewayResult, SampledFrame, VideoSampler};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Video metadata needed for sampling.
#[derive(Debug, Clone, Copy)]
struct VideoInfo {
    fps: f64,
    duration_secs: f64,
}

/// ffmpeg/ffprobe-based frame sampler.
pub struct FfmpegVideoSampler;

impl FfmpegVideoSampler {
    pub fn new() -> Self {
        Self
    }

    async fn probe(&self, path: &Path) -> GatewayResult<VideoInfo> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=avg_frame_rate",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to spawn ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Decode(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::Decode(format!("unreadable ffprobe output: {e}")))?;

        let fps = probe
            .streams
            .first()
            .and_then(|s| s.avg_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0);

        let duration_secs = probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(VideoInfo { fps, duration_secs })
    }
}

impl Default for FfmpegVideoSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSampler for FfmpegVideoSampler {
    async fn sample(
        &self,
        path: &Path,
        target_fps: f64,
    ) -> GatewayResult<(Vec<SampledFrame>, f64)> {
        if !path.exists() {
            return Err(GatewayError::Decode(format!(
                "video not found: {}",
                path.display()
            )));
        }

        let info = self.probe(path).await?;
        let stride = frame_stride(info.fps, target_fps);

        debug!(
            video = %path.display(),
            fps = info.fps,
            duration = info.duration_secs,
            stride,
            "Sampling video"
        );

        let frame_dir = tempfile::tempdir()
            .map_err(|e| GatewayError::Decode(format!("cannot create frame dir: {e}")))?;
        let pattern = frame_dir.path().join("frame_%05d.jpg");

        let filter = format!("select=not(mod(n\\,{stride}))");
        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-i"])
            .arg(path)
            .args(["-vf", &filter, "-vsync", "vfr", "-q:v", "2"])
            .arg(&pattern)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to spawn ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Decode(format!(
                "ffmpeg failed for {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let mut frame_paths: Vec<_> = std::fs::read_dir(frame_dir.path())
            .map_err(|e| GatewayError::Decode(format!("cannot list frames: {e}")))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        frame_paths.sort();

        let mut frames = Vec::with_capacity(frame_paths.len());
        for (index, frame_path) in frame_paths.iter().enumerate() {
            let jpeg = std::fs::read(frame_path)
                .map_err(|e| GatewayError::Decode(format!("cannot read frame: {e}")))?;
            frames.push(SampledFrame { index, jpeg });
        }

        info!(
            video = %path.display(),
            frames = frames.len(),
            duration = info.duration_secs,
            "Sampling complete"
        );

        Ok((frames, info.duration_secs))
    }
}

/// Parses ffprobe's rational frame rate ("30000/1001").
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.parse().ok()?;
            let denominator: f64 = denominator.parse().ok()?;
            if denominator == 0.0 {
                None
            } else {
                Some(numerator / denominator)
            }
        }
        None => rate.parse().ok(),
    }
}

/// Source frames to skip per emitted frame: round(source_fps / target_fps),
/// at least 1. Unknown source rates fall back to a common 30 fps assumption.
fn frame_stride(source_fps: f64, target_fps: f64) -> u32 {
    let source = if source_fps > 0.0 { source_fps } else { 30.0 };
    let target = if target_fps > 0.0 { target_fps } else { 1.0 };
    ((source / target).round() as u32).max(1)
}
