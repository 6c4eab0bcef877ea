//! Identity Arbiter
//!
//! Resolves a detection's feature vectors to a person identity. Face matches
//! against the enrolled library are authoritative and propagate the body
//! signature into the per-person cache, so a once-face-identified person can
//! be recognized by back/side profile for the cache window. Soft body
//! matches never write the cache.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::domain::entities::{PersonRole, ResolutionMethod, ResolvedIdentity, ResolvedRole};
use crate::domain::repositories::{PersonRepository, RepoResult};
use crate::domain::value_objects::{BodyEmbedding, FaceEmbedding};

/// Arbiter thresholds and cache window.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Cosine similarity above which a face match is accepted.
    pub face_threshold: f32,
    /// Cosine similarity above which a cached-body match is accepted.
    pub body_threshold: f32,
    /// Lower bound of the soft-body band (exclusive). Matches in
    /// (soft_threshold, body_threshold] resolve as suspected family.
    pub soft_threshold: f32,
    /// Freshness window for cached body signatures.
    pub cache_window_hours: i64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            face_threshold: 0.65,
            body_threshold: 0.60,
            soft_threshold: 0.55,
            cache_window_hours: 48,
        }
    }
}

/// Resolves detections to person identities via face-then-body fallback.
pub struct IdentityArbiter {
    person_repo: Arc<dyn PersonRepository>,
    config: ArbiterConfig,
}

impl IdentityArbiter {
    pub fn new(person_repo: Arc<dyn PersonRepository>, config: ArbiterConfig) -> Self {
        Self {
            person_repo,
            config,
        }
    }

    /// Resolves one detection. Policy, first match wins:
    /// 1. face match (authoritative, writes the body cache),
    /// 2. body match against fresh owner caches (refreshes the cache),
    /// 3. soft body match (suspected family, cache untouched),
    /// 4. stranger.
    pub async fn identify(
        &self,
        face: Option<&FaceEmbedding>,
        body: Option<&BodyEmbedding>,
        clip_time: DateTime<Utc>,
    ) -> RepoResult<ResolvedIdentity> {
        if let Some(face_vec) = face {
            if let Some(identity) = self.match_by_face(face_vec, body, clip_time).await? {
                return Ok(identity);
            }
        }

        if let Some(body_vec) = body {
            if let Some(identity) = self.match_by_body(body_vec, clip_time).await? {
                return Ok(identity);
            }
            if let Some(identity) = self.soft_match_by_body(body_vec, clip_time).await? {
                return Ok(identity);
            }
        }

        Ok(ResolvedIdentity::stranger())
    }

    async fn match_by_face(
        &self,
        face: &FaceEmbedding,
        body: Option<&BodyEmbedding>,
        clip_time: DateTime<Utc>,
    ) -> RepoResult<Option<ResolvedIdentity>> {
        let matched = self
            .person_repo
            .find_best_face_match(face, self.config.face_threshold)
            .await?;

        let Some(matched) = matched else {
            return Ok(None);
        };

        // The sole write path that binds a body signature to a known
        // identity via face confirmation.
        if let Some(body_vec) = body {
            self.person_repo
                .update_body_cache(matched.person_id, body_vec, clip_time)
                .await?;
        }

        info!(
            person_id = matched.person_id,
            name = %matched.name,
            similarity = matched.similarity,
            "Face match"
        );

        let role = match matched.role {
            PersonRole::Owner => ResolvedRole::Family,
            PersonRole::Visitor => ResolvedRole::Visitor,
            PersonRole::Unknown => ResolvedRole::Unknown,
        };

        Ok(Some(ResolvedIdentity {
            person_id: Some(matched.person_id),
            role,
            method: ResolutionMethod::Face,
            confidence: matched.similarity,
        }))
    }

    async fn match_by_body(
        &self,
        body: &BodyEmbedding,
        clip_time: DateTime<Utc>,
    ) -> RepoResult<Option<ResolvedIdentity>> {
        let since = clip_time - Duration::hours(self.config.cache_window_hours);

        let matched = self
            .person_repo
            .find_best_body_match(body, since, self.config.body_threshold, None)
            .await?;

        let Some(matched) = matched else {
            return Ok(None);
        };

        // Refresh the cache so the signature stays live while the person
        // keeps appearing.
        self.person_repo
            .update_body_cache(matched.person_id, body, clip_time)
            .await?;

        info!(
            person_id = matched.person_id,
            name = %matched.name,
            similarity = matched.similarity,
            "Body match"
        );

        Ok(Some(ResolvedIdentity {
            person_id: Some(matched.person_id),
            role: ResolvedRole::Family,
            method: ResolutionMethod::Body,
            confidence: matched.similarity,
        }))
    }

    async fn soft_match_by_body(
        &self,
        body: &BodyEmbedding,
        clip_time: DateTime<Utc>,
    ) -> RepoResult<Option<ResolvedIdentity>> {
        let since = clip_time - Duration::hours(self.config.cache_window_hours);

        let matched = self
            .person_repo
            .find_best_body_match(
                body,
                since,
                self.config.soft_threshold,
                Some(self.config.body_threshold),
            )
            .await?;

        let Some(matched) = matched else {
            return Ok(None);
        };

        debug!(
            person_id = matched.person_id,
            similarity = matched.similarity,
            "Soft body match, marking as suspected family"
        );

        Ok(Some(ResolvedIdentity {
            person_id: Some(matched.person_id),
            role: ResolvedRole::SuspectedFamily,
            method: ResolutionMethod::SoftBody,
            confidence: matched.similarity,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Person;
    use crate::domain::repositories::{BodyMatch, FaceMatch, RepositoryError};
    use crate::domain::value_objects::{BODY_EMBEDDING_DIM, FACE_EMBEDDING_DIM};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock person repository recording cache writes and serving canned
    /// matches.
    struct MockPersonRepo {
        face_match: Option<FaceMatch>,
        body_match: Option<BodyMatch>,
        soft_match: Option<BodyMatch>,
        cache_writes: Mutex<Vec<(i64, DateTime<Utc>)>>,
    }

    impl MockPersonRepo {
        fn empty() -> Self {
            Self {
                face_match: None,
                body_match: None,
                soft_match: None,
                cache_writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<(i64, DateTime<Utc>)> {
            self.cache_writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PersonRepository for MockPersonRepo {
        async fn find_by_id(&self, _id: i64) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn find_by_name(&self, _name: &str) -> RepoResult<Option<Person>> {
            Ok(None)
        }
        async fn upsert_owner(&self, _name: &str) -> RepoResult<Person> {
            Err(RepositoryError::NotFound("not supported".into()))
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
            Ok(self.face_match.clone())
        }
        async fn find_best_body_match(
            &self,
            _embedding: &BodyEmbedding,
            _since: DateTime<Utc>,
            _min_similarity: f32,
            max_similarity: Option<f32>,
        ) -> RepoResult<Option<BodyMatch>> {
            // The bounded query is the soft-match band.
            if max_similarity.is_some() {
                Ok(self.soft_match.clone())
            } else {
                Ok(self.body_match.clone())
            }
        }
        async fn update_body_cache(
            &self,
            person_id: i64,
            _embedding: &BodyEmbedding,
            at: DateTime<Utc>,
        ) -> RepoResult<()> {
            self.cache_writes.lock().unwrap().push((person_id, at));
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

    fn face() -> FaceEmbedding {
        FaceEmbedding::new(vec![0.2; FACE_EMBEDDING_DIM])
    }

    fn body() -> BodyEmbedding {
        BodyEmbedding::new(vec![0.1; BODY_EMBEDDING_DIM])
    }

    fn arbiter_with(repo: MockPersonRepo) -> (IdentityArbiter, Arc<MockPersonRepo>) {
        let repo = Arc::new(repo);
        (
            IdentityArbiter::new(repo.clone(), ArbiterConfig::default()),
            repo,
        )
    }

    #[tokio::test]
    async fn face_hit_resolves_family_and_writes_cache() {
        let mut repo = MockPersonRepo::empty();
        repo.face_match = Some(FaceMatch {
            person_id: 1,
            name: "Family_1".into(),
            role: PersonRole::Owner,
            similarity: 0.82,
        });
        let (arbiter, repo) = arbiter_with(repo);
        let now = Utc::now();

        let identity = arbiter
            .identify(Some(&face()), Some(&body()), now)
            .await
            .unwrap();

        assert_eq!(identity.person_id, Some(1));
        assert_eq!(identity.role, ResolvedRole::Family);
        assert_eq!(identity.method, ResolutionMethod::Face);
        assert_eq!(repo.writes(), vec![(1, now)]);
    }

    #[tokio::test]
    async fn face_hit_without_body_skips_cache_write() {
        let mut repo = MockPersonRepo::empty();
        repo.face_match = Some(FaceMatch {
            person_id: 1,
            name: "Family_1".into(),
            role: PersonRole::Owner,
            similarity: 0.9,
        });
        let (arbiter, repo) = arbiter_with(repo);

        let identity = arbiter
            .identify(Some(&face()), None, Utc::now())
            .await
            .unwrap();

        assert_eq!(identity.method, ResolutionMethod::Face);
        assert!(repo.writes().is_empty());
    }

    #[tokio::test]
    async fn body_hit_resolves_family_and_refreshes_cache() {
        let mut repo = MockPersonRepo::empty();
        repo.body_match = Some(BodyMatch {
            person_id: 1,
            name: "Family_1".into(),
            similarity: 0.71,
        });
        let (arbiter, repo) = arbiter_with(repo);
        let now = Utc::now();

        let identity = arbiter.identify(None, Some(&body()), now).await.unwrap();

        assert_eq!(identity.person_id, Some(1));
        assert_eq!(identity.role, ResolvedRole::Family);
        assert_eq!(identity.method, ResolutionMethod::Body);
        assert_eq!(repo.writes(), vec![(1, now)]);
    }

    #[tokio::test]
    async fn soft_body_hit_is_suspected_and_never_writes_cache() {
        let mut repo = MockPersonRepo::empty();
        repo.soft_match = Some(BodyMatch {
            person_id: 1,
            name: "Family_1".into(),
            similarity: 0.57,
        });
        let (arbiter, repo) = arbiter_with(repo);

        let identity = arbiter
            .identify(None, Some(&body()), Utc::now())
            .await
            .unwrap();

        assert_eq!(identity.role, ResolvedRole::SuspectedFamily);
        assert_eq!(identity.method, ResolutionMethod::SoftBody);
        assert!(repo.writes().is_empty());
    }

    #[tokio::test]
    async fn total_miss_resolves_stranger() {
        let (arbiter, repo) = arbiter_with(MockPersonRepo::empty());

        let identity = arbiter
            .identify(Some(&face()), Some(&body()), Utc::now())
            .await
            .unwrap();

        assert_eq!(identity.person_id, None);
        assert_eq!(identity.role, ResolvedRole::Stranger);
        assert_eq!(identity.method, ResolutionMethod::New);
        assert!(repo.writes().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_match_resolves_stranger() {
        let (arbiter, _) = arbiter_with(MockPersonRepo::empty());
        let identity = arbiter.identify(None, None, Utc::now()).await.unwrap();
        assert_eq!(identity.role, ResolvedRole::Stranger);
    }

    /// Stateful repo: face matches always hit person 1, body matches are
    /// computed against the actual cached signature with the window and
    /// similarity band applied. Exercises the face-then-body propagation
    /// across consecutive clips.
    struct CachingPersonRepo {
        cache: Mutex<Option<(BodyEmbedding, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl PersonRepository for CachingPersonRepo {
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
                similarity: 0.82,
            }))
        }
        async fn find_best_body_match(
            &self,
            embedding: &BodyEmbedding,
            since: DateTime<Utc>,
            min_similarity: f32,
            max_similarity: Option<f32>,
        ) -> RepoResult<Option<BodyMatch>> {
            let cache = self.cache.lock().unwrap();
            let Some((cached, updated_at)) = cache.as_ref() else {
                return Ok(None);
            };
            if *updated_at < since {
                return Ok(None);
            }
            let similarity = cached.cosine_similarity(embedding);
            let in_band = similarity > min_similarity
                && max_similarity.map(|max| similarity <= max).unwrap_or(true);
            if !in_band {
                return Ok(None);
            }
            Ok(Some(BodyMatch {
                person_id: 1,
                name: "Family_1".into(),
                similarity,
            }))
        }
        async fn update_body_cache(
            &self,
            _person_id: i64,
            embedding: &BodyEmbedding,
            at: DateTime<Utc>,
        ) -> RepoResult<()> {
            *self.cache.lock().unwrap() = Some((embedding.clone(), at));
            Ok(())
        }
        async fn search_owner_by_keywords(&self, _keywords: &[String]) -> RepoResult<Option<i64>> {
            Ok(None)
        }
        async fn count(&self) -> RepoResult<i64> {
            Ok(1)
        }
        async fn count_faces(&self) -> RepoResult<i64> {
            Ok(1)
        }
    }

    /// A unit body vector with the given cosine similarity to `base_body()`.
    fn body_with_similarity(target: f32) -> BodyEmbedding {
        let dim = BODY_EMBEDDING_DIM;
        let base = 1.0 / (dim as f32).sqrt();
        // Mix the base direction with an orthogonal one: cos = target.
        let orthogonal = (1.0 - target * target).sqrt();
        let mut values = vec![base * target; dim];
        values[0] += orthogonal * std::f32::consts::FRAC_1_SQRT_2;
        values[1] -= orthogonal * std::f32::consts::FRAC_1_SQRT_2;
        BodyEmbedding::new(values)
    }

    fn base_body() -> BodyEmbedding {
        let dim = BODY_EMBEDDING_DIM;
        BodyEmbedding::new(vec![1.0 / (dim as f32).sqrt(); dim]).normalized()
    }

    #[tokio::test]
    async fn face_confirmed_body_enables_later_body_only_recognition() {
        let repo = Arc::new(CachingPersonRepo {
            cache: Mutex::new(None),
        });
        let arbiter = IdentityArbiter::new(repo.clone(), ArbiterConfig::default());

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(20);

        // Clip A: face hit binds the body signature to person 1.
        let first = arbiter
            .identify(Some(&face()), Some(&base_body()), t0)
            .await
            .unwrap();
        assert_eq!(first.method, ResolutionMethod::Face);

        // Clip B: no face, similar body (cos ~0.71) resolves by body and
        // advances the cache timestamp.
        let second = arbiter
            .identify(None, Some(&body_with_similarity(0.71)), t1)
            .await
            .unwrap();
        assert_eq!(second.person_id, Some(1));
        assert_eq!(second.role, ResolvedRole::Family);
        assert_eq!(second.method, ResolutionMethod::Body);

        let cache = repo.cache.lock().unwrap();
        assert_eq!(cache.as_ref().unwrap().1, t1);
    }

    #[tokio::test]
    async fn soft_similarity_is_suspected_and_cache_time_stays() {
        let repo = Arc::new(CachingPersonRepo {
            cache: Mutex::new(None),
        });
        let arbiter = IdentityArbiter::new(repo.clone(), ArbiterConfig::default());

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(20);

        arbiter
            .identify(Some(&face()), Some(&base_body()), t0)
            .await
            .unwrap();

        // cos ~0.57 lands in the soft band: suspected family, no cache write.
        let second = arbiter
            .identify(None, Some(&body_with_similarity(0.57)), t1)
            .await
            .unwrap();
        assert_eq!(second.role, ResolvedRole::SuspectedFamily);
        assert_eq!(second.method, ResolutionMethod::SoftBody);

        let cache = repo.cache.lock().unwrap();
        assert_eq!(cache.as_ref().unwrap().1, t0);
    }

    #[tokio::test]
    async fn expired_cache_window_prevents_body_recognition() {
        let repo = Arc::new(CachingPersonRepo {
            cache: Mutex::new(None),
        });
        let arbiter = IdentityArbiter::new(repo.clone(), ArbiterConfig::default());

        let t0 = Utc::now();
        let later = t0 + chrono::Duration::hours(49);

        arbiter
            .identify(Some(&face()), Some(&base_body()), t0)
            .await
            .unwrap();

        let second = arbiter
            .identify(None, Some(&body_with_similarity(0.9)), later)
            .await
            .unwrap();
        assert_eq!(second.role, ResolvedRole::Stranger);
    }
}
