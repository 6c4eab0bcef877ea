//! Intra-Clip Tracker
//!
//! IoU-based tracking of persons across the sampled frames of one clip.
//! When a detection matches a live track that was recently fully evaluated,
//! the scanner reuses the track's identity instead of re-extracting
//! embeddings and calling the arbiter. Trackers are reset per clip and never
//! shared across clips.

use std::collections::HashMap;

use crate::domain::entities::ResolvedIdentity;
use crate::domain::value_objects::{BodyEmbedding, BoundingBox};

/// Tracker tuning parameters.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to join a live track.
    pub iou_threshold: f32,
    /// Re-run the full identification path after this many reused frames.
    pub revalidate_interval: usize,
    /// Expire tracks unmatched for more than this many frames.
    pub max_age: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.7,
            revalidate_interval: 5,
            max_age: 3,
        }
    }
}

/// A person being tracked within one clip.
#[derive(Debug, Clone)]
struct Track {
    bbox: BoundingBox,
    identity: ResolvedIdentity,
    /// Body embedding from the last full evaluation, reused by skipped
    /// detections so stranger bucketing stays stable across a track.
    body_embedding: Option<BodyEmbedding>,
    first_frame: usize,
    last_frame: usize,
    skip_count: usize,
    total_detections: usize,
}

/// Per-clip IoU tracker.
#[derive(Debug)]
pub struct IouTracker {
    config: TrackerConfig,
    tracks: HashMap<u64, Track>,
    next_track_id: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            next_track_id: 1,
        }
    }

    /// Matches a detection bbox to the live track with the highest IoU at or
    /// above the threshold. Expired tracks never match.
    pub fn match_track(&self, bbox: &BoundingBox, frame_index: usize) -> Option<u64> {
        let mut best: Option<(u64, f32)> = None;

        for (&track_id, track) in &self.tracks {
            let age = frame_index.saturating_sub(track.last_frame);
            if age > self.config.max_age {
                continue;
            }

            let iou = bbox.iou(&track.bbox);
            if iou < self.config.iou_threshold {
                continue;
            }

            match best {
                Some((_, best_iou)) if iou <= best_iou => {}
                _ => best = Some((track_id, iou)),
            }
        }

        best.map(|(id, _)| id)
    }

    /// Whether the track's identity is stale enough to require a fresh
    /// embedding extraction and arbitration.
    pub fn should_revalidate(&self, track_id: u64, frame_index: usize) -> bool {
        match self.tracks.get(&track_id) {
            Some(track) => {
                let since_last = frame_index.saturating_sub(track.last_frame) + track.skip_count;
                since_last >= self.config.revalidate_interval
            }
            None => true,
        }
    }

    /// Identity currently bound to a track.
    pub fn identity(&self, track_id: u64) -> Option<ResolvedIdentity> {
        self.tracks.get(&track_id).map(|t| t.identity.clone())
    }

    /// Body embedding captured at the track's last full evaluation.
    pub fn body_embedding(&self, track_id: u64) -> Option<BodyEmbedding> {
        self.tracks.get(&track_id).and_then(|t| t.body_embedding.clone())
    }

    /// Creates a new track bound to a freshly arbitrated identity.
    pub fn create_track(
        &mut self,
        bbox: BoundingBox,
        identity: ResolvedIdentity,
        body_embedding: Option<BodyEmbedding>,
        frame_index: usize,
    ) -> u64 {
        let track_id = self.next_track_id;
        self.next_track_id += 1;

        self.tracks.insert(
            track_id,
            Track {
                bbox,
                identity,
                body_embedding,
                first_frame: frame_index,
                last_frame: frame_index,
                skip_count: 0,
                total_detections: 1,
            },
        );

        track_id
    }

    /// Updates a track after a reused (skipped) detection: position advances,
    /// identity stays.
    pub fn record_skip(&mut self, track_id: u64, bbox: BoundingBox, frame_index: usize) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.bbox = bbox;
            track.last_frame = frame_index;
            track.skip_count += 1;
            track.total_detections += 1;
        } else {
            tracing::warn!(track_id, "Attempted to update a missing track");
        }
    }

    /// Updates a track after a full re-evaluation: position and identity
    /// advance, the skip counter resets.
    pub fn record_full(
        &mut self,
        track_id: u64,
        bbox: BoundingBox,
        identity: ResolvedIdentity,
        body_embedding: Option<BodyEmbedding>,
        frame_index: usize,
    ) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.bbox = bbox;
            track.identity = identity;
            track.body_embedding = body_embedding;
            track.last_frame = frame_index;
            track.skip_count = 0;
            track.total_detections += 1;
        } else {
            tracing::warn!(track_id, "Attempted to update a missing track");
        }
    }

    /// Removes tracks unmatched for longer than the max age.
    pub fn cleanup(&mut self, frame_index: usize) {
        let max_age = self.config.max_age;
        self.tracks.retain(|track_id, track| {
            let age = frame_index.saturating_sub(track.last_frame);
            let keep = age <= max_age;
            if !keep {
                tracing::debug!(
                    track_id,
                    lifetime = track.last_frame - track.first_frame + 1,
                    skips = track.skip_count,
                    detections = track.total_detections,
                    "Expiring track"
                );
            }
            keep
        });
    }

    /// Resets all state for a new clip.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_track_id = 1;
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}
