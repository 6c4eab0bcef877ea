//! Event Entity
//!
//! A maximal ordered group of clips fused by the time+identity policy,
//! together with per-person aggregates and representative keyframes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::clip::ClipResult;
use super::detection::{Detection, ResolutionMethod, ResolvedRole};
use crate::domain::value_objects::BoundingBox;

/// Assumed frame center for keyframe scoring. The sampler does not propagate
/// frame dimensions, so scoring centers on a nominal 640x480 frame.
pub const FRAME_CENTER: (f32, f32) = (320.0, 240.0);

/// Number of leading body-embedding components hashed into a stranger key.
const STRANGER_HASH_COMPONENTS: usize = 20;

/// Per-person aggregate within one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonActivity {
    pub role: ResolvedRole,
    pub method: ResolutionMethod,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub cameras: Vec<String>,
}

/// The representative detection chosen for one person in one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyframe {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub method: ResolutionMethod,
    pub frame_index: usize,
    pub clip_time: DateTime<Utc>,
    pub camera: String,
}

/// A fused event spanning one or more clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub cameras: Vec<String>,
    pub people: BTreeSet<i64>,
    pub people_info: BTreeMap<i64, PersonActivity>,
    /// Count of stranger observations, including id-less detections.
    pub stranger_count: usize,
    pub has_strangers: bool,
    pub clips: Vec<ClipResult>,
    pub keyframes: BTreeMap<i64, Keyframe>,
    pub summary_text: Option<String>,
    pub prompt_text: Option<String>,
    /// Behaviour-inferred role overrides for known persons.
    pub inferred_roles: BTreeMap<i64, ResolvedRole>,
    /// Behaviour-inferred role for the stranger bucket, if any.
    pub stranger_inferred_role: Option<ResolvedRole>,
}

impl Event {
    /// Packs an ordered group of clips into one event, computing the time
    /// span, camera set, people aggregates and keyframes.
    pub fn pack(clips: Vec<ClipResult>) -> Option<Self> {
        if clips.is_empty() {
            return None;
        }

        let start_time = clips.first().map(|c| c.start_time)?;
        let end_time = clips.last().map(|c| c.start_time)?;

        // Event duration is the longest clip duration; fall back to the
        // start-time span when durations are unavailable.
        let max_video_duration = clips
            .iter()
            .map(|c| c.video_duration_secs)
            .filter(|d| *d > 0.0)
            .fold(f64::NAN, f64::max);
        let duration_secs = if max_video_duration.is_nan() {
            (end_time - start_time).num_milliseconds() as f64 / 1000.0
        } else {
            max_video_duration
        };

        let mut cameras = Vec::new();
        for clip in &clips {
            if !cameras.contains(&clip.camera) {
                cameras.push(clip.camera.clone());
            }
        }

        let mut event = Self {
            start_time,
            end_time,
            duration_secs,
            cameras,
            people: BTreeSet::new(),
            people_info: BTreeMap::new(),
            stranger_count: 0,
            has_strangers: false,
            clips,
            keyframes: BTreeMap::new(),
            summary_text: None,
            prompt_text: None,
            inferred_roles: BTreeMap::new(),
            stranger_inferred_role: None,
        };

        event.reaggregate_people();
        event.select_keyframes();

        Some(event)
    }

    /// Recomputes the people set, per-person aggregates and stranger counts
    /// from the current clip detections. Called after packing and again after
    /// the identity refiner mutates detection roles; the stranger sentinel
    /// must survive so downstream stages can tell "no people" apart from
    /// "only unresolved strangers".
    pub fn reaggregate_people(&mut self) {
        self.people.clear();
        self.people_info.clear();

        let mut idless_strangers = 0usize;

        for clip in &self.clips {
            for detection in clip.detections() {
                match detection.person_id() {
                    Some(person_id) => {
                        self.people.insert(person_id);
                        let info =
                            self.people_info
                                .entry(person_id)
                                .or_insert_with(|| PersonActivity {
                                    role: detection.role(),
                                    method: detection.method(),
                                    first_seen: clip.start_time,
                                    last_seen: clip.start_time,
                                    cameras: Vec::new(),
                                });
                        info.last_seen = clip.start_time;
                        info.role = detection.role();
                        info.method = detection.method();
                        if !info.cameras.contains(&clip.camera) {
                            info.cameras.push(clip.camera.clone());
                        }
                    }
                    None => {
                        if detection.role().is_stranger() {
                            idless_strangers += 1;
                        }
                    }
                }
            }
        }

        let stranger_persons = self
            .people_info
            .values()
            .filter(|info| info.role.is_stranger())
            .count();

        self.stranger_count = idless_strangers + stranger_persons;
        self.has_strangers = self.stranger_count > 0;
    }

    /// Selects the representative detection per known person.
    fn select_keyframes(&mut self) {
        self.keyframes.clear();

        for &person_id in &self.people {
            let mut best: Option<(f64, usize, Keyframe)> = None;

            for clip in &self.clips {
                for detection in clip.detections() {
                    if detection.person_id() != Some(person_id) {
                        continue;
                    }

                    let score = detection_score(detection);
                    let frame = detection.frame_index;

                    let better = match &best {
                        None => true,
                        Some((best_score, best_frame, _)) => {
                            score > *best_score || (score == *best_score && frame < *best_frame)
                        }
                    };

                    if better {
                        best = Some((
                            score,
                            frame,
                            Keyframe {
                                bbox: detection.bbox,
                                confidence: detection.confidence,
                                method: detection.method(),
                                frame_index: frame,
                                clip_time: clip.start_time,
                                camera: clip.camera.clone(),
                            },
                        ));
                    }
                }
            }

            if let Some((_, _, keyframe)) = best {
                self.keyframes.insert(person_id, keyframe);
            }
        }
    }

    /// Whether the event contains neither known people nor strangers.
    pub fn is_empty_of_people(&self) -> bool {
        self.people.is_empty() && !self.has_strangers
    }

    /// Basename of the first clip's video file.
    pub fn first_video_filename(&self) -> Option<String> {
        self.clips.first().and_then(|c| c.file_name())
    }

    /// Comma-joined distinct camera locations.
    pub fn camera_location(&self) -> String {
        self.cameras.join(",")
    }

    /// Iterates every detection across all clips.
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.clips.iter().flat_map(|c| c.detections())
    }
}

/// Quality score used for keyframe and representative-detection selection.
/// Face-confirmed detections dominate, then body matches, then confidence,
/// resolution and centeredness.
pub fn detection_score(detection: &Detection) -> f64 {
    let mut score = 0.0;

    match detection.method() {
        ResolutionMethod::Face => score += 10_000.0,
        ResolutionMethod::Body => score += 5_000.0,
        _ => {}
    }

    score += detection.confidence as f64 * 100.0;
    score += detection.bbox.area() as f64;
    score -= detection.bbox.center_distance_to(FRAME_CENTER) as f64 * 0.5;

    score
}

/// Stable grouping key for an unresolved stranger detection.
///
/// Hashes the first 20 body-embedding components so repeated observations of
/// the same physical stranger land in one bucket. Two distinct strangers with
/// highly correlated embeddings may collide; they then bind to a single new
/// person and later evidence can split them. Detections without a body
/// embedding each get an index-based bucket.
pub fn stranger_key(detection: &Detection, fallback_index: usize) -> String {
    match &detection.body_embedding {
        Some(body) => {
            let mut hasher = Sha256::new();
            for value in body.values().iter().take(STRANGER_HASH_COMPONENTS) {
                hasher.update(value.to_le_bytes());
            }
            let digest = hasher.finalize();
            let mut hex = String::with_capacity(8);
            for byte in digest.iter().take(4) {
                hex.push_str(&format!("{:02x}", byte));
            }
            format!("hash_{hex}")
        }
        None => format!("unknown_{fallback_index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ResolvedIdentity;
    use crate::domain::value_objects::{BodyEmbedding, BODY_EMBEDDING_DIM};
    use chrono::TimeZone;

    fn detection(
        person_id: Option<i64>,
        role: ResolvedRole,
        method: ResolutionMethod,
        confidence: f32,
        frame_index: usize,
    ) -> Detection {
        Detection {
            frame_index,
            bbox: BoundingBox::new(100, 100, 80, 160),
            confidence,
            face_embedding: None,
            body_embedding: None,
            track_id: None,
            identity: ResolvedIdentity {
                person_id,
                role,
                method,
                confidence,
            },
        }
    }

    fn clip(at_secs: i64, camera: &str, frames: Vec<Vec<Detection>>) -> ClipResult {
        ClipResult {
            start_time: Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap()
                + chrono::Duration::seconds(at_secs),
            camera: camera.to_string(),
            video_path: "videos/clip.mp4".into(),
            video_duration_secs: 10.0,
            frames,
        }
    }

    #[test]
    fn pack_rejects_empty_group() {
        assert!(Event::pack(vec![]).is_none());
    }

    #[test]
    fn pack_computes_time_span_and_duration() {
        let mut c1 = clip(0, "doorbell", vec![]);
        c1.video_duration_secs = 30.0;
        let c2 = clip(20, "indoor_living", vec![]);

        let event = Event::pack(vec![c1, c2]).unwrap();
        assert_eq!((event.end_time - event.start_time).num_seconds(), 20);
        // Longest clip duration wins over the start-time span.
        assert!((event.duration_secs - 30.0).abs() < f64::EPSILON);
        assert_eq!(event.cameras, vec!["doorbell", "indoor_living"]);
    }

    #[test]
    fn pack_falls_back_to_span_without_durations() {
        let mut c1 = clip(0, "doorbell", vec![]);
        c1.video_duration_secs = 0.0;
        let mut c2 = clip(45, "doorbell", vec![]);
        c2.video_duration_secs = 0.0;

        let event = Event::pack(vec![c1, c2]).unwrap();
        assert!((event.duration_secs - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregation_tracks_people_and_strangers() {
        let c1 = clip(
            0,
            "doorbell",
            vec![vec![detection(
                Some(1),
                ResolvedRole::Family,
                ResolutionMethod::Face,
                0.9,
                0,
            )]],
        );
        let c2 = clip(
            10,
            "indoor_living",
            vec![vec![
                detection(Some(1), ResolvedRole::Family, ResolutionMethod::Body, 0.8, 0),
                detection(None, ResolvedRole::Stranger, ResolutionMethod::New, 0.7, 0),
            ]],
        );

        let event = Event::pack(vec![c1, c2]).unwrap();
        assert_eq!(event.people.len(), 1);
        assert!(event.has_strangers);
        assert_eq!(event.stranger_count, 1);

        let info = &event.people_info[&1];
        assert_eq!(info.cameras, vec!["doorbell", "indoor_living"]);
    }

    #[test]
    fn empty_event_is_distinguished_from_stranger_only() {
        let empty = Event::pack(vec![clip(0, "doorbell", vec![vec![]])]).unwrap();
        assert!(empty.is_empty_of_people());

        let strangers_only = Event::pack(vec![clip(
            0,
            "doorbell",
            vec![vec![detection(
                None,
                ResolvedRole::Stranger,
                ResolutionMethod::New,
                0.7,
                0,
            )]],
        )])
        .unwrap();
        assert!(!strangers_only.is_empty_of_people());
    }

    #[test]
    fn keyframe_prefers_face_over_body() {
        let c = clip(
            0,
            "doorbell",
            vec![
                vec![detection(Some(1), ResolvedRole::Family, ResolutionMethod::Body, 0.99, 0)],
                vec![detection(Some(1), ResolvedRole::Family, ResolutionMethod::Face, 0.60, 1)],
            ],
        );

        let event = Event::pack(vec![c]).unwrap();
        let keyframe = &event.keyframes[&1];
        assert_eq!(keyframe.method, ResolutionMethod::Face);
        assert_eq!(keyframe.frame_index, 1);
    }

    #[test]
    fn keyframe_ties_break_on_earliest_frame() {
        let c = clip(
            0,
            "doorbell",
            vec![
                vec![detection(Some(1), ResolvedRole::Family, ResolutionMethod::Face, 0.8, 0)],
                vec![detection(Some(1), ResolvedRole::Family, ResolutionMethod::Face, 0.8, 1)],
            ],
        );

        let event = Event::pack(vec![c]).unwrap();
        assert_eq!(event.keyframes[&1].frame_index, 0);
    }

    #[test]
    fn stranger_key_is_stable_for_same_body() {
        let body = BodyEmbedding::new(vec![0.25; BODY_EMBEDDING_DIM]);
        let mut d1 = detection(None, ResolvedRole::Stranger, ResolutionMethod::New, 0.7, 0);
        d1.body_embedding = Some(body.clone());
        let mut d2 = detection(None, ResolvedRole::Stranger, ResolutionMethod::New, 0.6, 3);
        d2.body_embedding = Some(body);

        assert_eq!(stranger_key(&d1, 0), stranger_key(&d2, 1));
        assert!(stranger_key(&d1, 0).starts_with("hash_"));
    }

    #[test]
    fn stranger_key_without_body_uses_index() {
        let d = detection(None, ResolvedRole::Stranger, ResolutionMethod::New, 0.7, 0);
        assert_eq!(stranger_key(&d, 4), "unknown_4");
    }

    #[test]
    fn detection_score_orders_methods() {
        let face = detection(Some(1), ResolvedRole::Family, ResolutionMethod::Face, 0.5, 0);
        let body = detection(Some(1), ResolvedRole::Family, ResolutionMethod::Body, 0.99, 0);
        let fresh = detection(None, ResolvedRole::Stranger, ResolutionMethod::New, 0.99, 0);

        assert!(detection_score(&face) > detection_score(&body));
        assert!(detection_score(&body) > detection_score(&fresh));
    }
}
