//! Clip Entities
//!
//! A clip is one short video file with a wall-clock start time from one
//! camera. The scanner turns a clip into a `ClipResult` carrying per-frame
//! resolved detections.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::detection::Detection;

/// An immutable clip input record, resolved against the video base directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRecord {
    pub video_path: PathBuf,
    pub camera: String,
    pub start_time: DateTime<Utc>,
}

impl ClipRecord {
    pub fn new(video_path: impl Into<PathBuf>, camera: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            video_path: video_path.into(),
            camera: camera.into(),
            start_time,
        }
    }

    /// Basename of the video file, used as the stored event filename.
    pub fn file_name(&self) -> Option<String> {
        self.video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Scanner output for one clip: metadata plus per-frame ordered detections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipResult {
    pub start_time: DateTime<Utc>,
    pub camera: String,
    pub video_path: PathBuf,
    pub video_duration_secs: f64,
    /// One entry per sampled frame, in frame order.
    pub frames: Vec<Vec<Detection>>,
}

/// Summary of who appears in a clip, used by the fusion policy.
#[derive(Debug, Clone, Default)]
pub struct ClipPeopleProfile {
    pub person_ids: HashSet<i64>,
    pub has_family: bool,
    pub has_stranger: bool,
}

impl ClipPeopleProfile {
    /// Strangers present and no family at all.
    pub fn all_strangers(&self) -> bool {
        self.has_stranger && !self.has_family
    }

    /// Family present and no strangers at all.
    pub fn family_only(&self) -> bool {
        self.has_family && !self.has_stranger
    }
}

impl ClipResult {
    /// Basename of the video file.
    pub fn file_name(&self) -> Option<String> {
        self.video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Iterates every detection in frame order.
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.frames.iter().flatten()
    }

    /// Total number of detections across all frames.
    pub fn detection_count(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }

    /// Extracts the people profile the fusion policy reasons over.
    pub fn people_profile(&self) -> ClipPeopleProfile {
        let mut profile = ClipPeopleProfile::default();

        for detection in self.detections() {
            if let Some(person_id) = detection.person_id() {
                profile.person_ids.insert(person_id);
            }
            if detection.role().is_family() {
                profile.has_family = true;
            } else if detection.role().is_stranger() {
                profile.has_stranger = true;
            }
        }

        profile
    }
}
