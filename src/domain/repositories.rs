//! Repository Traits
//!
//! Abstractions for data persistence (Dependency Inversion Principle).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::entities::{DailySummary, MatchMethod, Person, PersonRole, StoredEvent};
use crate::domain::value_objects::{BodyEmbedding, FaceEmbedding};

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository error types.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

/// Nearest-neighbour face match over the enrolled library.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub person_id: i64,
    pub name: String,
    pub role: PersonRole,
    pub similarity: f32,
}

/// Nearest-neighbour body match over cached owner signatures.
#[derive(Debug, Clone)]
pub struct BodyMatch {
    pub person_id: i64,
    pub name: String,
    pub similarity: f32,
}

/// Person repository interface, including the vector lookups the identity
/// arbiter depends on.
#[async_trait]
pub trait PersonRepository: Send + Sync {
    /// Finds a person by ID.
    async fn find_by_id(&self, id: i64) -> RepoResult<Option<Person>>;

    /// Finds a person by exact name.
    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Person>>;

    /// Upserts an owner person by name, returning the existing or new record.
    async fn upsert_owner(&self, name: &str) -> RepoResult<Person>;

    /// Inserts an enrolled face unless one already exists for the same
    /// (person, source image) key. Returns true when a row was inserted.
    async fn insert_face_if_absent(
        &self,
        person_id: i64,
        embedding: &FaceEmbedding,
        source_image: &str,
    ) -> RepoResult<bool>;

    /// Nearest face over the enrolled library by cosine similarity, accepted
    /// above the given threshold.
    async fn find_best_face_match(
        &self,
        embedding: &FaceEmbedding,
        min_similarity: f32,
    ) -> RepoResult<Option<FaceMatch>>;

    /// Nearest cached body signature among owners whose cache entry is at
    /// least as fresh as `since`, with similarity in (min, max]. `max` of
    /// None means unbounded above.
    async fn find_best_body_match(
        &self,
        embedding: &BodyEmbedding,
        since: DateTime<Utc>,
        min_similarity: f32,
        max_similarity: Option<f32>,
    ) -> RepoResult<Option<BodyMatch>>;

    /// Overwrites a person's body cache entry and advances last_seen. The
    /// read-decide-write sequence is serialized per person with a row lock so
    /// concurrent clip workers cannot interleave partial updates.
    async fn update_body_cache(
        &self,
        person_id: i64,
        embedding: &BodyEmbedding,
        at: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Keyword search over owner names and notes (case-insensitive).
    async fn search_owner_by_keywords(&self, keywords: &[String]) -> RepoResult<Option<i64>>;

    /// Counts persons.
    async fn count(&self) -> RepoResult<i64>;

    /// Counts enrolled faces.
    async fn count_faces(&self) -> RepoResult<i64>;
}

/// A new event row to insert.
#[derive(Debug, Clone)]
pub struct NewStoredEvent {
    pub id: Uuid,
    pub video_filename: Option<String>,
    pub start_time: DateTime<Utc>,
    pub camera_location: String,
    pub llm_description: String,
}

/// A stranger bucket to materialize as a new person row.
#[derive(Debug, Clone)]
pub struct StrangerUpsert {
    pub bucket_key: String,
    pub name: String,
    pub role: PersonRole,
    pub body_embedding: BodyEmbedding,
    pub at: DateTime<Utc>,
}

/// A behaviour-inferred role update for an existing person.
#[derive(Debug, Clone)]
pub struct RoleUpdate {
    pub person_id: i64,
    pub role: PersonRole,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Reference to a person in a save plan: either a known id or a stranger
/// bucket resolved to a fresh id inside the save transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PersonRef {
    Known(i64),
    Stranger(String),
}

/// One appearance row to insert for a save plan.
#[derive(Debug, Clone)]
pub struct NewAppearance {
    pub person: PersonRef,
    pub match_method: MatchMethod,
    pub body_embedding: BodyEmbedding,
}

/// Filter for detail-event retrieval.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub date: Option<NaiveDate>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub person_id: Option<i64>,
    pub keyword: Option<String>,
    pub limit: i64,
}

/// One appearance joined with its person, as retrieved for answering.
#[derive(Debug, Clone)]
pub struct RetrievedAppearance {
    pub appearance_id: i64,
    pub person_id: i64,
    pub match_method: MatchMethod,
    pub person_name: Option<String>,
    pub person_role: Option<PersonRole>,
    /// Filled in by the evidence materializer, not the store.
    pub snapshot_path: Option<String>,
}

/// One event with its appearances, as retrieved for answering.
#[derive(Debug, Clone)]
pub struct RetrievedEvent {
    pub event_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub camera_location: String,
    pub llm_description: String,
    pub video_filename: Option<String>,
    pub appearances: Vec<RetrievedAppearance>,
}

/// Event repository interface. `save_event` covers the whole per-event
/// write set in one transaction; nothing from a failed event is visible.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Atomically inserts the event row, materializes stranger persons,
    /// applies role updates and inserts all appearances. Returns the event id.
    async fn save_event(
        &self,
        event: &NewStoredEvent,
        strangers: &[StrangerUpsert],
        role_updates: &[RoleUpdate],
        appearances: &[NewAppearance],
    ) -> RepoResult<Uuid>;

    /// Events whose start time falls on the given calendar date, ordered by
    /// start time ascending.
    async fn find_by_date(&self, date: NaiveDate) -> RepoResult<Vec<StoredEvent>>;

    /// Distinct calendar dates having at least one event, ascending.
    async fn distinct_dates(&self) -> RepoResult<Vec<NaiveDate>>;

    /// Detail retrieval joining events, appearances and persons.
    async fn find_events(&self, filter: &EventFilter) -> RepoResult<Vec<RetrievedEvent>>;

    /// Counts stored events.
    async fn count(&self) -> RepoResult<i64>;

    /// Destructive maintenance: truncates events, appearances and summaries
    /// and removes non-owner persons; with `purge_enrollment` also removes
    /// owners and their faces.
    async fn clear_store(&self, purge_enrollment: bool) -> RepoResult<()>;
}

/// Daily summary repository interface.
#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Upserts a summary by date, overwriting text and total and bumping
    /// updated_at on conflict. Returns the record id.
    async fn upsert(
        &self,
        date: NaiveDate,
        summary_text: &str,
        total_events: i32,
    ) -> RepoResult<i64>;

    /// Finds the summary for a date.
    async fn find_by_date(&self, date: NaiveDate) -> RepoResult<Option<DailySummary>>;

    /// Finds summaries within an inclusive date range, newest first.
    async fn find_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepoResult<Vec<DailySummary>>;

    /// Most recent summaries, newest first.
    async fn find_recent(&self, limit: i64) -> RepoResult<Vec<DailySummary>>;
}
