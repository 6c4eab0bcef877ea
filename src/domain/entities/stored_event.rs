//! Stored Event Entities
//!
//! Persisted event rows and their per-person appearance snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::detection::ResolutionMethod;
use crate::domain::value_objects::BodyEmbedding;

/// How a stored appearance was matched. This is the storage-facing enum; the
/// in-memory `ResolutionMethod` collapses onto it before persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Face,
    BodyReid,
    BodyReidRefined,
    New,
    Unknown,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::BodyReid => "body_reid",
            Self::BodyReidRefined => "body_reid_refined",
            Self::New => "new",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "face" => Some(Self::Face),
            "body_reid" => Some(Self::BodyReid),
            "body_reid_refined" => Some(Self::BodyReidRefined),
            "new" => Some(Self::New),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl From<ResolutionMethod> for MatchMethod {
    fn from(method: ResolutionMethod) -> Self {
        match method {
            ResolutionMethod::Face => Self::Face,
            ResolutionMethod::Body => Self::BodyReid,
            ResolutionMethod::RefinedFromSuspected
            | ResolutionMethod::RefinedFromStranger
            | ResolutionMethod::RefinedFromContext => Self::BodyReidRefined,
            ResolutionMethod::New => Self::New,
            ResolutionMethod::SoftBody => Self::Unknown,
        }
    }
}

/// A persisted event row. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub video_filename: Option<String>,
    pub start_time: DateTime<Utc>,
    pub camera_location: String,
    pub llm_description: String,
}

/// A persisted appearance linking one event, one person and the
/// representative body vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAppearance {
    pub id: i64,
    pub event_id: Uuid,
    pub person_id: i64,
    pub match_method: MatchMethod,
    pub body_embedding: BodyEmbedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_methods_map_to_storage_enum() {
        assert_eq!(MatchMethod::from(ResolutionMethod::Face), MatchMethod::Face);
        assert_eq!(
            MatchMethod::from(ResolutionMethod::Body),
            MatchMethod::BodyReid
        );
        assert_eq!(
            MatchMethod::from(ResolutionMethod::RefinedFromSuspected),
            MatchMethod::BodyReidRefined
        );
        assert_eq!(
            MatchMethod::from(ResolutionMethod::RefinedFromContext),
            MatchMethod::BodyReidRefined
        );
        assert_eq!(MatchMethod::from(ResolutionMethod::New), MatchMethod::New);
        assert_eq!(
            MatchMethod::from(ResolutionMethod::SoftBody),
            MatchMethod::Unknown
        );
    }

    #[test]
    fn match_method_string_roundtrip() {
        for method in [
            MatchMethod::Face,
            MatchMethod::BodyReid,
            MatchMethod::BodyReidRefined,
            MatchMethod::New,
            MatchMethod::Unknown,
        ] {
            assert_eq!(MatchMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(MatchMethod::parse("bogus"), None);
    }
}
