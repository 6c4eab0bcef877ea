//! Evidence Materializer
//!
//! Turns retrieved appearance rows into visual evidence: one JPEG snapshot
//! per appearance, extracted from the stored video. Extraction failures are
//! logged and yield a null snapshot; the answer path never blocks on them.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::services::retriever::Evidence;
use crate::domain::gateways::SnapshotExtractor;
use crate::domain::repositories::RetrievedEvent;

/// Materializes snapshots for retrieved events.
pub struct EvidenceMaterializer {
    extractor: Arc<dyn SnapshotExtractor>,
    videos_base_dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl EvidenceMaterializer {
    pub fn new(
        extractor: Arc<dyn SnapshotExtractor>,
        videos_base_dir: PathBuf,
        snapshots_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            videos_base_dir,
            snapshots_dir,
        }
    }

    /// Attaches snapshot paths to every detail appearance in place.
    pub async fn materialize(&self, evidence: &mut [Evidence]) {
        if let Err(e) = std::fs::create_dir_all(&self.snapshots_dir) {
            warn!(dir = %self.snapshots_dir.display(), error = %e, "Cannot create snapshot directory");
            return;
        }

        for item in evidence.iter_mut() {
            if let Evidence::Detail(event) = item {
                self.materialize_event(event).await;
            }
        }
    }

    async fn materialize_event(&self, event: &mut RetrievedEvent) {
        let Some(video_filename) = event.video_filename.clone() else {
            debug!(event_id = %event.event_id, "Event has no video file, skipping snapshots");
            return;
        };

        let video_path = self.videos_base_dir.join(&video_filename);
        if !video_path.exists() {
            debug!(video = %video_path.display(), "Video file missing, skipping snapshots");
            return;
        }

        for appearance in &mut event.appearances {
            let snapshot_name = format!(
                "event_{}_appearance_{}_person_{}.jpg",
                event.event_id, appearance.appearance_id, appearance.person_id
            );
            let snapshot_path = self.snapshots_dir.join(&snapshot_name);

            match self.extractor.extract(&video_path, &snapshot_path).await {
                Ok(()) => {
                    appearance.snapshot_path =
                        Some(snapshot_path.to_string_lossy().into_owned());
                }
                Err(e) => {
                    warn!(
                        video = %video_path.display(),
                        error = %e,
                        "Snapshot extraction failed"
                    );
                    appearance.snapshot_path = None;
                }
            }
        }
    }
}
