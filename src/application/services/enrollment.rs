//! Enrollment Registry
//!
//! Loads labelled reference photos from a flat directory and registers each
//! as an owner person with an enrolled face embedding. Idempotent across
//! re-runs: the (person, source image) pair is the uniqueness key.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::application::error::AppResult;
use crate::domain::gateways::VisionModel;
use crate::domain::repositories::PersonRepository;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpeg", "jpg", "png"];

/// Result counts of one enrollment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentReport {
    /// Images whose face was registered in this run.
    pub enrolled: usize,
    /// Images already registered from a previous run.
    pub already_enrolled: usize,
    /// Images skipped because no face was detected or the file was unreadable.
    pub skipped: usize,
}

/// Registers reference photos as enrolled owner persons.
pub struct EnrollmentService {
    person_repo: Arc<dyn PersonRepository>,
    vision: Arc<dyn VisionModel>,
}

impl EnrollmentService {
    pub fn new(person_repo: Arc<dyn PersonRepository>, vision: Arc<dyn VisionModel>) -> Self {
        Self {
            person_repo,
            vision,
        }
    }

    /// Scans a directory of reference photos (one person per file, filename
    /// stem is the stable key) and upserts persons and faces. Per-image
    /// failures are logged and skipped.
    pub async fn enroll(&self, directory: &Path) -> AppResult<EnrollmentReport> {
        let mut image_files: Vec<_> = std::fs::read_dir(directory)
            .map_err(|e| {
                crate::application::error::AppError::InvalidInput(format!(
                    "cannot read enrollment directory {}: {e}",
                    directory.display()
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        image_files.sort();

        if image_files.is_empty() {
            warn!(dir = %directory.display(), "No reference photos found");
            return Ok(EnrollmentReport::default());
        }

        info!(
            dir = %directory.display(),
            count = image_files.len(),
            "Enrolling reference photos"
        );

        let mut report = EnrollmentReport::default();

        for path in image_files {
            match self.enroll_image(&path).await {
                Ok(true) => report.enrolled += 1,
                Ok(false) => report.already_enrolled += 1,
                Err(e) => {
                    warn!(image = %path.display(), error = %e, "Skipping reference photo");
                    report.skipped += 1;
                }
            }
        }

        info!(
            enrolled = report.enrolled,
            existing = report.already_enrolled,
            skipped = report.skipped,
            "Enrollment complete"
        );

        Ok(report)
    }

    /// Enrolls one photo. Returns true when a new face row was inserted.
    async fn enroll_image(&self, path: &Path) -> AppResult<bool> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                crate::application::error::AppError::InvalidInput(format!(
                    "unusable file name: {}",
                    path.display()
                ))
            })?
            .to_string();

        let bytes = std::fs::read(path).map_err(|e| {
            crate::application::error::AppError::InvalidInput(format!(
                "cannot read {}: {e}",
                path.display()
            ))
        })?;

        let faces = self.vision.detect_faces(&bytes).await?;

        // Largest face wins; reference photos occasionally contain bystanders.
        let face = faces
            .into_iter()
            .max_by_key(|f| f.bbox.area())
            .ok_or_else(|| {
                crate::application::error::AppError::InvalidInput("no face detected".to_string())
            })?;

        let embedding = face.embedding.normalized();
        let name = format!("Family_{stem}");
        let source_image = format!(
            "lib/{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| stem.clone())
        );

        let person = self.person_repo.upsert_owner(&name).await?;
        let inserted = self
            .person_repo
            .insert_face_if_absent(person.id(), &embedding, &source_image)
            .await?;

        if inserted {
            info!(person_id = person.id(), name = %name, source = %source_image, "Enrolled face");
        } else {
            info!(person_id = person.id(), name = %name, "Face already enrolled");
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Person, PersonRole};
    use crate::domain::gateways::{
        FaceDetection, GatewayResult, PersonDetection, PersonFeatures,
    };
    use crate::domain::repositories::{BodyMatch, FaceMatch, RepoResult};
    use crate::domain::value_objects::{
        BodyEmbedding, BoundingBox, FaceEmbedding, FACE_EMBEDDING_DIM,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory person store good enough for idempotence tests.
    #[derive(Default)]
    struct InMemoryPersonRepo {
        state: Mutex<RepoState>,
    }

    #[derive(Default)]
    struct RepoState {
        persons: HashMap<String, i64>,
        faces: Vec<(i64, String)>,
        next_id: i64,
    }

    #[async_trait]
    impl PersonRepository for InMemoryPersonRepo {
        async fn find_by_id(&self, _id: i64) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn find_by_name(&self, _name: &str) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn upsert_owner(&self, name: &str) -> RepoResult<Person> {
            let mut state = self.state.lock().unwrap();
            let id = match state.persons.get(name).copied() {
                Some(id) => id,
                None => {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.persons.insert(name.to_string(), id);
                    id
                }
            };
            let now = Utc::now();
            Ok(Person::from_db(
                id,
                name.to_string(),
                PersonRole::Owner,
                None,
                None,
                now,
                now,
                None,
            ))
        }
        async fn insert_face_if_absent(
            &self,
            person_id: i64,
            _embedding: &FaceEmbedding,
            source_image: &str,
        ) -> RepoResult<bool> {
            let mut state = self.state.lock().unwrap();
            let key = (person_id, source_image.to_string());
            if state.faces.contains(&key) {
                return Ok(false);
            }
            state.faces.push(key);
            Ok(true)
        }
        async fn find_best_face_match(
            &self,
            _embedding: &FaceEmbedding,
            _min_similarity: f32,
        ) -> RepoResult<Option<FaceMatch>> {
            Ok(None)
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
            Ok(self.state.lock().unwrap().persons.len() as i64)
        }
        async fn count_faces(&self) -> RepoResult<i64> {
            Ok(self.state.lock().unwrap().faces.len() as i64)
        }
    }

    /// Vision stub: one face per photo unless the file is in the blind list.
    struct StubVision {
        blind_files_marker: &'static str,
    }

    #[async_trait]
    impl VisionModel for StubVision {
        async fn detect_persons(&self, _frame: &[u8]) -> GatewayResult<Vec<PersonDetection>> {
            Ok(vec![])
        }
        async fn encode_person(&self, _crop: &[u8]) -> GatewayResult<PersonFeatures> {
            Ok(PersonFeatures {
                face_embedding: None,
                body_embedding: None,
            })
        }
        async fn detect_faces(&self, image: &[u8]) -> GatewayResult<Vec<FaceDetection>> {
            if image.starts_with(self.blind_files_marker.as_bytes()) {
                return Ok(vec![]);
            }
            Ok(vec![
                FaceDetection {
                    bbox: BoundingBox::new(0, 0, 40, 40),
                    embedding: FaceEmbedding::new(vec![0.5; FACE_EMBEDDING_DIM]),
                },
                FaceDetection {
                    bbox: BoundingBox::new(50, 50, 120, 120),
                    embedding: FaceEmbedding::new(vec![0.9; FACE_EMBEDDING_DIM]),
                },
            ])
        }
    }

    fn service() -> (EnrollmentService, Arc<InMemoryPersonRepo>) {
        let repo = Arc::new(InMemoryPersonRepo::default());
        let vision = Arc::new(StubVision {
            blind_files_marker: "NOFACE",
        });
        (EnrollmentService::new(repo.clone(), vision), repo)
    }

    fn write_photos(dir: &Path, names: &[(&str, &str)]) {
        for (name, content) in names {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    #[tokio::test]
    async fn enrolls_one_person_per_photo() {
        let dir = tempfile::tempdir().unwrap();
        write_photos(dir.path(), &[("1.jpeg", "img-1"), ("2.jpeg", "img-2")]);
        let (service, repo) = service();

        let report = service.enroll(dir.path()).await.unwrap();

        assert_eq!(report.enrolled, 2);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.count_faces().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn enrollment_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_photos(dir.path(), &[("1.jpeg", "img-1"), ("2.jpeg", "img-2")]);
        let (service, repo) = service();

        service.enroll(dir.path()).await.unwrap();
        let second = service.enroll(dir.path()).await.unwrap();

        assert_eq!(second.enrolled, 0);
        assert_eq!(second.already_enrolled, 2);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.count_faces().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn photos_without_faces_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_photos(dir.path(), &[("1.jpeg", "img-1"), ("blank.jpeg", "NOFACE")]);
        let (service, repo) = service();

        let report = service.enroll(dir.path()).await.unwrap();

        assert_eq!(report.enrolled, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_image_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_photos(dir.path(), &[("readme.txt", "hi"), ("1.png", "img-1")]);
        let (service, repo) = service();

        let report = service.enroll(dir.path()).await.unwrap();

        assert_eq!(report.enrolled, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service();
        let report = service.enroll(dir.path()).await.unwrap();
        assert_eq!(report, EnrollmentReport::default());
    }
}
