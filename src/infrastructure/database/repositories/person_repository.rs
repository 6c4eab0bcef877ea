//! Person Repository Implementation
//!
//! Postgres-backed person store. Vector lookups use pgvector's cosine
//! distance operator; similarity is 1 - distance. Body-cache writes take a
//! per-person row lock so concurrent clip workers serialize their
//! read-decide-write sequences.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use crate::domain::entities::Person;
use crate::domain::repositories::{
    BodyMatch, FaceMatch, PersonRepository, RepoResult, RepositoryError,
};
use crate::domain::value_objects::{BodyEmbedding, FaceEmbedding};
use crate::infrastructure::database::models::{BodyMatchRow, FaceMatchRow, PersonRow};

/// PostgreSQL person repository.
pub struct PgPersonRepository {
    pool: PgPool,
}

impl PgPersonRepository {
    /// Creates a new person repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_person(row: PersonRow) -> RepoResult<Person> {
        let body = match row.current_body_embedding {
            Some(vector) => Some(BodyEmbedding::from_vec(vector.to_vec()).ok_or_else(|| {
                RepositoryError::Serialization(format!(
                    "person {} carries a body vector of wrong dimension",
                    row.id
                ))
            })?),
            None => None,
        };

        Ok(Person::from_db(
            row.id,
            row.name,
            row.role,
            body,
            row.body_update_time,
            row.first_seen,
            row.last_seen,
            row.notes,
        ))
    }
}

#[async_trait]
impl PersonRepository for PgPersonRepository {
    async fn find_by_id(&self, id: i64) -> RepoResult<Option<Person>> {
        let row: Option<PersonRow> = sqlx::query_as(
            r#"
            SELECT id, name, role, current_body_embedding, body_update_time,
                   first_seen, last_seen, notes
            FROM persons
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_person).transpose()
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Person>> {
        let row: Option<PersonRow> = sqlx::query_as(
            r#"
            SELECT id, name, role, current_body_embedding, body_update_time,
                   first_seen, last_seen, notes
            FROM persons
            WHERE name = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_person).transpose()
    }

    async fn upsert_owner(&self, name: &str) -> RepoResult<Person> {
        if let Some(existing) = sqlx::query_as::<_, PersonRow>(
            r#"
            SELECT id, name, role, current_body_embedding, body_update_time,
                   first_seen, last_seen, notes
            FROM persons
            WHERE name = $1 AND role = 'owner'
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        {
            return Self::row_to_person(existing);
        }

        let row: PersonRow = sqlx::query_as(
            r#"
            INSERT INTO persons (name, role, first_seen, last_seen)
            VALUES ($1, 'owner', NOW(), NOW())
            RETURNING id, name, role, current_body_embedding, body_update_time,
                      first_seen, last_seen, notes
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_person(row)
    }

    async fn insert_face_if_absent(
        &self,
        person_id: i64,
        embedding: &FaceEmbedding,
        source_image: &str,
    ) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO person_faces (person_id, embedding, source_image)
            VALUES ($1, $2, $3)
            ON CONFLICT (person_id, source_image) DO NOTHING
            "#,
        )
        .bind(person_id)
        .bind(Vector::from(embedding.to_vec()))
        .bind(source_image)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_best_face_match(
        &self,
        embedding: &FaceEmbedding,
        min_similarity: f32,
    ) -> RepoResult<Option<FaceMatch>> {
        let vector = Vector::from(embedding.to_vec());

        let row: Option<FaceMatchRow> = sqlx::query_as(
            r#"
            SELECT pf.person_id,
                   p.name,
                   p.role,
                   (1 - (pf.embedding <=> $1))::float8 AS similarity
            FROM person_faces pf
            JOIN persons p ON p.id = pf.person_id
            WHERE 1 - (pf.embedding <=> $1) > $2
            ORDER BY pf.embedding <=> $1
            LIMIT 1
            "#,
        )
        .bind(&vector)
        .bind(min_similarity as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FaceMatch {
            person_id: r.person_id,
            name: r.name,
            role: r.role,
            similarity: (r.similarity as f32).clamp(-1.0, 1.0),
        }))
    }

    async fn find_best_body_match(
        &self,
        embedding: &BodyEmbedding,
        since: DateTime<Utc>,
        min_similarity: f32,
        max_similarity: Option<f32>,
    ) -> RepoResult<Option<BodyMatch>> {
        let vector = Vector::from(embedding.to_vec());

        let row: Option<BodyMatchRow> = sqlx::query_as(
            r#"
            SELECT id,
                   name,
                   (1 - (current_body_embedding <=> $1))::float8 AS similarity
            FROM persons
            WHERE role = 'owner'
              AND current_body_embedding IS NOT NULL
              AND body_update_time >= $2
              AND 1 - (current_body_embedding <=> $1) > $3
              AND ($4::float8 IS NULL OR 1 - (current_body_embedding <=> $1) <= $4)
            ORDER BY current_body_embedding <=> $1
            LIMIT 1
            "#,
        )
        .bind(&vector)
        .bind(since)
        .bind(min_similarity as f64)
        .bind(max_similarity.map(|v| v as f64))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| BodyMatch {
            person_id: r.id,
            name: r.name,
            similarity: (r.similarity as f32).clamp(-1.0, 1.0),
        }))
    }

    async fn update_body_cache(
        &self,
        person_id: i64,
        embedding: &BodyEmbedding,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes the read-decide-write against other clip
        // workers touching the same person.
        let locked: Option<(i64,)> =
            sqlx::query_as(r#"SELECT id FROM persons WHERE id = $1 FOR UPDATE"#)
                .bind(person_id)
                .fetch_optional(&mut *tx)
                .await?;

        if locked.is_none() {
            return Err(RepositoryError::NotFound(format!("Person {person_id}")));
        }

        sqlx::query(
            r#"
            UPDATE persons
            SET current_body_embedding = $2,
                body_update_time = $3,
                last_seen = $3
            WHERE id = $1
            "#,
        )
        .bind(person_id)
        .bind(Vector::from(embedding.to_vec()))
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn search_owner_by_keywords(&self, keywords: &[String]) -> RepoResult<Option<i64>> {
        if keywords.is_empty() {
            return Ok(None);
        }

        let mut conditions = Vec::new();
        for index in 0..keywords.len() {
            let position = index + 1;
            conditions.push(format!(
                "(name ILIKE ${position} OR notes ILIKE ${position})"
            ));
        }
        let sql = format!(
            "SELECT id FROM persons WHERE role = 'owner' AND ({}) ORDER BY id LIMIT 1",
            conditions.join(" OR ")
        );

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for keyword in keywords {
            query = query.bind(format!("%{keyword}%"));
        }

        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|(id,)| id))
    }

    async fn count(&self) -> RepoResult<i64> {
        let result: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM persons"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0)
    }

    async fn count_faces(&self) -> RepoResult<i64> {
        let result: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM person_faces"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0)
    }
}
