//! Clip Scanner
//!
//! Per-clip micro-pipeline: sample frames, detect persons, extract features,
//! resolve identities. The intra-clip tracker elides redundant feature
//! extraction for persons that stay put between sampled frames.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::ImageOutputFormat;
use tracing::{debug, info, warn};

use crate::application::error::{AppError, AppResult};
use crate::application::services::identity_arbiter::IdentityArbiter;
use crate::application::services::tracker::{IouTracker, TrackerConfig};
use crate::domain::entities::{ClipRecord, ClipResult, Detection};
use crate::domain::gateways::{SampledFrame, VideoSampler, VisionModel};
use crate::domain::value_objects::BoundingBox;

/// Scanner tuning parameters.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Approximate sampling rate in frames per second.
    pub target_fps: f64,
    /// Minimum detection confidence to keep.
    pub min_confidence: f32,
    /// Minimum bbox side length in pixels to keep.
    pub min_bbox_side: i32,
    /// Tracker parameters; tracking can be disabled for debugging.
    pub tracker: TrackerConfig,
    pub enable_tracking: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_fps: 1.0,
            min_confidence: 0.5,
            min_bbox_side: 50,
            tracker: TrackerConfig::default(),
            enable_tracking: true,
        }
    }
}

/// Per-clip scan statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub total_detections: usize,
    pub full_evaluations: usize,
    pub skipped_evaluations: usize,
}

/// Scans one clip into per-frame resolved detections.
pub struct ClipScanner {
    sampler: Arc<dyn VideoSampler>,
    vision: Arc<dyn VisionModel>,
    arbiter: Arc<IdentityArbiter>,
    config: ScannerConfig,
}

impl ClipScanner {
    pub fn new(
        sampler: Arc<dyn VideoSampler>,
        vision: Arc<dyn VisionModel>,
        arbiter: Arc<IdentityArbiter>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            sampler,
            vision,
            arbiter,
            config,
        }
    }

    /// Processes one clip. Returns None when the video yields no frames.
    pub async fn scan(&self, record: &ClipRecord) -> AppResult<Option<ClipResult>> {
        let started = Instant::now();
        info!(
            video = %record.video_path.display(),
            camera = %record.camera,
            time = %record.start_time,
            "Scanning clip"
        );

        let (frames, duration_secs) = self
            .sampler
            .sample(&record.video_path, self.config.target_fps)
            .await?;

        if frames.is_empty() {
            warn!(video = %record.video_path.display(), "Clip yielded no frames");
            return Ok(None);
        }

        // Tracker state is scoped to this clip; track ids never cross clips.
        let mut tracker = IouTracker::new(self.config.tracker.clone());
        let mut stats = ScanStats::default();
        let mut frame_results: Vec<Vec<Detection>> = Vec::with_capacity(frames.len());

        for frame in &frames {
            let detections = self.scan_frame(frame, record, &mut tracker, &mut stats).await?;
            frame_results.push(detections);
            tracker.cleanup(frame.index);
        }

        let skip_ratio = if stats.total_detections > 0 {
            stats.skipped_evaluations as f64 / stats.total_detections as f64 * 100.0
        } else {
            0.0
        };
        info!(
            camera = %record.camera,
            frames = frames.len(),
            detections = stats.total_detections,
            full = stats.full_evaluations,
            skipped = stats.skipped_evaluations,
            skip_ratio = format!("{skip_ratio:.1}%"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Clip scan complete"
        );

        Ok(Some(ClipResult {
            start_time: record.start_time,
            camera: record.camera.clone(),
            video_path: record.video_path.clone(),
            video_duration_secs: duration_secs,
            frames: frame_results,
        }))
    }

    async fn scan_frame(
        &self,
        frame: &SampledFrame,
        record: &ClipRecord,
        tracker: &mut IouTracker,
        stats: &mut ScanStats,
    ) -> AppResult<Vec<Detection>> {
        let raw_detections = self.vision.detect_persons(&frame.jpeg).await?;

        let mut detections = Vec::new();

        for raw in raw_detections {
            if raw.confidence < self.config.min_confidence
                || raw.bbox.shorter_side() < self.config.min_bbox_side
            {
                continue;
            }

            stats.total_detections += 1;

            let track_id = if self.config.enable_tracking {
                tracker.match_track(&raw.bbox, frame.index)
            } else {
                None
            };

            // A recently-validated track lets us reuse its identity and skip
            // the expensive encode+arbitrate path entirely.
            let reused = track_id.and_then(|id| {
                if tracker.should_revalidate(id, frame.index) {
                    None
                } else {
                    tracker
                        .identity(id)
                        .map(|identity| (id, identity, tracker.body_embedding(id)))
                }
            });

            let detection = if let Some((track_id, identity, body)) = reused {
                stats.skipped_evaluations += 1;
                tracker.record_skip(track_id, raw.bbox, frame.index);

                debug!(
                    frame = frame.index,
                    track_id,
                    person_id = ?identity.person_id,
                    "Reusing track identity"
                );

                Detection {
                    frame_index: frame.index,
                    bbox: raw.bbox,
                    confidence: raw.confidence,
                    face_embedding: None,
                    body_embedding: body,
                    track_id: Some(track_id),
                    identity,
                }
            } else {
                stats.full_evaluations += 1;

                let crop = crop_to_jpeg(&frame.jpeg, &raw.bbox)?;
                let features = self.vision.encode_person(&crop).await?;

                let face = features.face_embedding.map(|f| f.normalized());
                let body = features.body_embedding.map(|b| b.normalized());

                let identity = self
                    .arbiter
                    .identify(face.as_ref(), body.as_ref(), record.start_time)
                    .await?;

                let assigned_track = if self.config.enable_tracking {
                    Some(match track_id {
                        Some(id) => {
                            tracker.record_full(
                                id,
                                raw.bbox,
                                identity.clone(),
                                body.clone(),
                                frame.index,
                            );
                            id
                        }
                        None => tracker.create_track(
                            raw.bbox,
                            identity.clone(),
                            body.clone(),
                            frame.index,
                        ),
                    })
                } else {
                    None
                };

                Detection {
                    frame_index: frame.index,
                    bbox: raw.bbox,
                    confidence: raw.confidence,
                    face_embedding: face,
                    body_embedding: body,
                    track_id: assigned_track,
                    identity,
                }
            };

            detections.push(detection);
        }

        Ok(detections)
    }
}

/// Crops a person region out of a JPEG frame and re-encodes it for the
/// feature encoder. The bbox is clamped to the frame bounds.
fn crop_to_jpeg(frame_jpeg: &[u8], bbox: &BoundingBox) -> AppResult<Vec<u8>> {
    let img = image::load_from_memory(frame_jpeg)?;

    let x = bbox.x().max(0) as u32;
    let y = bbox.y().max(0) as u32;
    if x >= img.width() || y >= img.height() {
        return Err(AppError::InvalidInput(format!(
            "bbox origin ({x}, {y}) outside frame {}x{}",
            img.width(),
            img.height()
        )));
    }
    let width = (bbox.width() as u32).min(img.width() - x).max(1);
    let height = (bbox.height() as u32).min(img.height() - y).max(1);

    let crop = img.crop_imm(x, y, width, height);
    let mut buffer = Vec::new();
    crop.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Jpeg(90))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::identity_arbiter::ArbiterConfig;
    use crate::domain::entities::{Person, PersonRole, ResolvedRole};
    use crate::domain::gateways::{
        FaceDetection, GatewayResult, PersonDetection, PersonFeatures,
    };
    use crate::domain::repositories::{
        BodyMatch, FaceMatch, PersonRepository, RepoResult, RepositoryError,
    };
    use crate::domain::value_objects::{
        BodyEmbedding, FaceEmbedding, BODY_EMBEDDING_DIM, FACE_EMBEDDING_DIM,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([64, 64, 64]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Jpeg(90))
            .unwrap();
        buffer
    }

    struct StubSampler {
        frame_count: usize,
    }

    #[async_trait]
    impl VideoSampler for StubSampler {
        async fn sample(
            &self,
            _path: &Path,
            _target_fps: f64,
        ) -> GatewayResult<(Vec<SampledFrame>, f64)> {
            let frames = (0..self.frame_count)
                .map(|index| SampledFrame {
                    index,
                    jpeg: test_jpeg(640, 480),
                })
                .collect();
            Ok((frames, self.frame_count as f64))
        }
    }

    struct StubVision {
        detections_per_frame: Vec<PersonDetection>,
        encode_calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionModel for StubVision {
        async fn detect_persons(&self, _frame: &[u8]) -> GatewayResult<Vec<PersonDetection>> {
            Ok(self.detections_per_frame.clone())
        }

        async fn encode_person(&self, _crop: &[u8]) -> GatewayResult<PersonFeatures> {
            self.encode_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PersonFeatures {
                face_embedding: Some(FaceEmbedding::new(vec![0.3; FACE_EMBEDDING_DIM])),
                body_embedding: Some(BodyEmbedding::new(vec![0.2; BODY_EMBEDDING_DIM])),
            })
        }

        async fn detect_faces(&self, _image: &[u8]) -> GatewayResult<Vec<FaceDetection>> {
            Ok(vec![])
        }
    }

    struct StubPersonRepo;

    #[async_trait]
    impl PersonRepository for StubPersonRepo {
        async fn find_by_id(&self, _id: i64) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn find_by_name(&self, _name: &str) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn upsert_owner(&self, _name: &str) -> RepoResult<Person> {
            Err(RepositoryError::NotFound("unsupported".into()))
        }
        async fn insert_face_if_absent(
            &self,
            _person_id: i64,
            _embedding: &FaceEmbedding,
            _source_image: &str,
        ) -> RepoResult<bool> {
            Ok(false)
        }
        async fn find_best_face_match(
            &self,
            _embedding: &FaceEmbedding,
            _min_similarity: f32,
        ) -> RepoResult<Option<FaceMatch>> {
            Ok(Some(FaceMatch {
                person_id: 1,
                name: "Family_1".into(),
                role: PersonRole::Owner,
                similarity: 0.8,
            }))
        }
        async fn find_best_body_match(
            &self,
            _embedding: &BodyEmbedding,
            _since: DateTime<Utc>,
            _min_similarity: f32,
            _max_similarity: Option<f32>,
        ) -> RepoResult<Option<BodyMatch>> {
            Ok(None)
        }
        async fn update_body_cache(
            &self,
            _person_id: i64,
            _embedding: &BodyEmbedding,
            _at: DateTime<Utc>,
        ) -> RepoResult<()> {
            Ok(())
        }
        async fn search_owner_by_keywords(&self, _keywords: &[String]) -> RepoResult<Option<i64>> {
            Ok(None)
        }
        async fn count(&self) -> RepoResult<i64> {
            Ok(0)
        }
        async fn count_faces(&self) -> RepoResult<i64> {
            Ok(0)
        }
    }

    fn scanner(frame_count: usize, detections: Vec<PersonDetection>) -> (ClipScanner, Arc<StubVision>) {
        let vision = Arc::new(StubVision {
            detections_per_frame: detections,
            encode_calls: AtomicUsize::new(0),
        });
        let arbiter = Arc::new(IdentityArbiter::new(
            Arc::new(StubPersonRepo),
            ArbiterConfig::default(),
        ));
        (
            ClipScanner::new(
                Arc::new(StubSampler { frame_count }),
                vision.clone(),
                arbiter,
                ScannerConfig::default(),
            ),
            vision,
        )
    }

    fn record() -> ClipRecord {
        ClipRecord::new("videos/clip.mp4", "doorbell", Utc::now())
    }

    #[tokio::test]
    async fn empty_video_yields_none() {
        let (scanner, _) = scanner(0, vec![]);
        assert!(scanner.scan(&record()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn small_or_weak_detections_are_filtered() {
        let (scanner, vision) = scanner(
            1,
            vec![
                PersonDetection {
                    bbox: BoundingBox::new(0, 0, 40, 200),
                    confidence: 0.9,
                },
                PersonDetection {
                    bbox: BoundingBox::new(0, 0, 100, 200),
                    confidence: 0.4,
                },
            ],
        );

        let result = scanner.scan(&record()).await.unwrap().unwrap();
        assert_eq!(result.detection_count(), 0);
        assert_eq!(vision.encode_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stable_person_reuses_track_identity() {
        let (scanner, vision) = scanner(
            4,
            vec![PersonDetection {
                bbox: BoundingBox::new(100, 100, 100, 200),
                confidence: 0.9,
            }],
        );

        let result = scanner.scan(&record()).await.unwrap().unwrap();
        assert_eq!(result.detection_count(), 4);

        // First frame runs the full path; the following three reuse the track.
        assert_eq!(vision.encode_calls.load(Ordering::SeqCst), 1);

        for detection in result.detections() {
            assert_eq!(detection.person_id(), Some(1));
            assert_eq!(detection.role(), ResolvedRole::Family);
            assert!(detection.track_id.is_some());
        }

        // Skipped detections still carry the cached body embedding.
        let skipped = result.frames[1].first().unwrap();
        assert!(skipped.body_embedding.is_some());
        assert!(skipped.face_embedding.is_none());
    }

    #[tokio::test]
    async fn frames_preserve_order() {
        let (scanner, _) = scanner(
            3,
            vec![PersonDetection {
                bbox: BoundingBox::new(100, 100, 100, 200),
                confidence: 0.9,
            }],
        );

        let result = scanner.scan(&record()).await.unwrap().unwrap();
        assert_eq!(result.frames.len(), 3);
        for (index, frame) in result.frames.iter().enumerate() {
            assert!(frame.iter().all(|d| d.frame_index == index));
        }
    }

    #[test]
    fn crop_clamps_to_frame_bounds() {
        let jpeg = test_jpeg(200, 200);
        let oversized = BoundingBox::new(150, 150, 500, 500);
        let crop = crop_to_jpeg(&jpeg, &oversized).unwrap();
        let decoded = image::load_from_memory(&crop).unwrap();
        assert_eq!(decoded.width(), 50);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn crop_outside_frame_is_rejected() {
        let jpeg = test_jpeg(100, 100);
        let outside = BoundingBox::new(400, 400, 50, 50);
        assert!(crop_to_jpeg(&jpeg, &outside).is_err());
    }
}
