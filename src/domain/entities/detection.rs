//! Detection Entity
//!
//! One person bounding box in one sampled frame, together with the identity
//! the arbiter resolved for it.

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{BodyEmbedding, BoundingBox, FaceEmbedding};

/// Role resolved for a detection while an event is in flight.
///
/// `Family`/`SuspectedFamily`/`Stranger` come from the identity arbiter and
/// refiner; `Visitor`/`Delivery`/`Service` only appear after behavioural
/// inference from the event summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedRole {
    Family,
    SuspectedFamily,
    Stranger,
    Visitor,
    Delivery,
    Service,
    Unknown,
}

impl ResolvedRole {
    /// Whether this role counts as a confirmed family member.
    pub fn is_family(&self) -> bool {
        matches!(self, Self::Family)
    }

    /// Whether this role counts as an unresolved stranger.
    pub fn is_stranger(&self) -> bool {
        matches!(self, Self::Stranger | Self::Unknown)
    }
}

/// How the arbiter (or refiner) arrived at a detection's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Authoritative face match against the enrolled library.
    Face,
    /// Body match against a fresh cache entry.
    Body,
    /// Low-confidence body match; never writes the cache.
    SoftBody,
    /// Promoted by the refiner after repeated soft matches in one event.
    RefinedFromSuspected,
    /// Re-marked by the refiner from stranger to suspected family.
    RefinedFromStranger,
    /// Promoted by the refiner for co-occurring with confirmed family.
    RefinedFromContext,
    /// No match; a new (stranger) observation.
    New,
}

impl ResolutionMethod {
    /// Whether this method was produced by the event-level refiner.
    pub fn is_refined(&self) -> bool {
        matches!(
            self,
            Self::RefinedFromSuspected | Self::RefinedFromStranger | Self::RefinedFromContext
        )
    }
}

/// Identity assigned to a detection by the arbiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub person_id: Option<i64>,
    pub role: ResolvedRole,
    pub method: ResolutionMethod,
    pub confidence: f32,
}

impl ResolvedIdentity {
    /// Identity of an unmatched stranger.
    pub fn stranger() -> Self {
        Self {
            person_id: None,
            role: ResolvedRole::Stranger,
            method: ResolutionMethod::New,
            confidence: 0.0,
        }
    }
}

/// A single resolved person detection in one sampled frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub frame_index: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub face_embedding: Option<FaceEmbedding>,
    pub body_embedding: Option<BodyEmbedding>,
    pub track_id: Option<u64>,
    pub identity: ResolvedIdentity,
}

impl Detection {
    pub fn person_id(&self) -> Option<i64> {
        self.identity.person_id
    }

    pub fn role(&self) -> ResolvedRole {
        self.identity.role
    }

    pub fn method(&self) -> ResolutionMethod {
        self.identity.method
    }
}
