//! Person Entity
//!
//! Represents a physical person known to the system, either enrolled from
//! reference photos (role=owner) or created when a stranger is first stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{BodyEmbedding, FaceEmbedding};

/// Stored role of a person.
///
/// Behavioural inference works with finer-grained roles (delivery, service)
/// which are mapped onto this storage enum before persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "person_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PersonRole {
    /// Enrolled household member.
    Owner,
    /// Known or behaviourally-inferred visitor (delivery, service, guest).
    Visitor,
    /// Unresolved stranger.
    Unknown,
}

impl Default for PersonRole {
    fn default() -> Self {
        Self::Unknown
    }
}

impl PersonRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Visitor => "visitor",
            Self::Unknown => "unknown",
        }
    }
}

/// A person known to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    id: i64,
    name: String,
    role: PersonRole,
    current_body_embedding: Option<BodyEmbedding>,
    body_update_time: Option<DateTime<Utc>>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    notes: Option<String>,
}

impl Person {
    /// Reconstructs a person from database fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_db(
        id: i64,
        name: String,
        role: PersonRole,
        current_body_embedding: Option<BodyEmbedding>,
        body_update_time: Option<DateTime<Utc>>,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            role,
            current_body_embedding,
            body_update_time,
            first_seen,
            last_seen,
            notes,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> PersonRole {
        self.role
    }

    pub fn current_body_embedding(&self) -> Option<&BodyEmbedding> {
        self.current_body_embedding.as_ref()
    }

    pub fn body_update_time(&self) -> Option<DateTime<Utc>> {
        self.body_update_time
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Whether the body cache entry is still valid at `now` for the given
    /// window. Only owners participate in body re-identification.
    pub fn body_cache_valid(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.role == PersonRole::Owner
            && self.current_body_embedding.is_some()
            && self
                .body_update_time
                .map(|t| now - t <= window)
                .unwrap_or(false)
    }
}

/// An enrolled reference face belonging to a person. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonFace {
    id: i64,
    person_id: i64,
    embedding: FaceEmbedding,
    source_image: String,
}

impl PersonFace {
    /// Reconstructs a face record from database fields.
    pub fn from_db(id: i64, person_id: i64, embedding: FaceEmbedding, source_image: String) -> Self {
        Self {
            id,
            person_id,
            embedding,
            source_image,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn person_id(&self) -> i64 {
        self.person_id
    }

    pub fn embedding(&self) -> &FaceEmbedding {
        &self.embedding
    }

    pub fn source_image(&self) -> &str {
        &self.source_image
    }
}
