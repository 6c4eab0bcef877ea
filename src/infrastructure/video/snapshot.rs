//! Snapshot Extractor
//!
//! Pulls a single JPEG frame from a stored video for evidence
//! materialization.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::gateways::{GatewayError, GatewayResult, SnapshotExtractor};

/// ffmpeg-based snapshot extractor.
pub struct FfmpegSnapshotExtractor;

impl FfmpegSnapshotExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegSnapshotExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotExtractor for FfmpegSnapshotExtractor {
    async fn extract(&self, video_path: &Path, output_path: &Path) -> GatewayResult<()> {
        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-i"])
            .arg(video_path)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to spawn ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Decode(format!(
                "snapshot extraction failed for {}: {}",
                video_path.display(),
                stderr.trim()
            )));
        }

        debug!(
            video = %video_path.display(),
            snapshot = %output_path.display(),
            "Snapshot extracted"
        );

        Ok(())
    }
}
