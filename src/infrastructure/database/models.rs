//! Database Row Models
//!
//! SQLx-compatible structs for database row mapping.

use chrono::{DateTime, NaiveDate, Utc};
use pgvector::Vector;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::entities::PersonRole;

/// Person database row.
#[derive(Debug, FromRow)]
pub struct PersonRow {
    pub id: i64,
    pub name: String,
    pub role: PersonRole,
    pub current_body_embedding: Option<Vector>,
    pub body_update_time: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Face nearest-neighbour result row.
#[derive(Debug, FromRow)]
pub struct FaceMatchRow {
    pub person_id: i64,
    pub name: String,
    pub role: PersonRole,
    pub similarity: f64,
}

/// Body nearest-neighbour result row.
#[derive(Debug, FromRow)]
pub struct BodyMatchRow {
    pub id: i64,
    pub name: String,
    pub similarity: f64,
}

/// Stored event row.
#[derive(Debug, FromRow)]
pub struct EventLogRow {
    pub id: Uuid,
    pub video_filename: Option<String>,
    pub start_time: DateTime<Utc>,
    pub camera_location: String,
    pub llm_description: String,
}

/// Joined retrieval row: one event appearance with its person.
#[derive(Debug, FromRow)]
pub struct RetrievalRow {
    pub event_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub camera_location: String,
    pub llm_description: String,
    pub video_filename: Option<String>,
    pub appearance_id: i64,
    pub person_id: i64,
    pub match_method: String,
    pub person_name: Option<String>,
    pub person_role: Option<PersonRole>,
}

/// Daily summary row.
#[derive(Debug, FromRow)]
pub struct DailySummaryRow {
    pub id: i64,
    pub summary_date: NaiveDate,
    pub summary_text: String,
    pub total_events: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
