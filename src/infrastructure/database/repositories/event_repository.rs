//! Event Repository Implementation
//!
//! Postgres-backed event store. `save_event` executes the whole per-event
//! write set in one transaction: event row, stranger person rows, role
//! updates and appearance rows. An abort leaves nothing visible.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{MatchMethod, StoredEvent};
use crate::domain::repositories::{
    EventFilter, EventRepository, NewAppearance, NewStoredEvent, PersonRef, RepoResult,
    RepositoryError, RetrievedAppearance, RetrievedEvent, RoleUpdate, StrangerUpsert,
};
use crate::infrastructure::database::models::{EventLogRow, RetrievalRow};

/// PostgreSQL event repository.
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new event repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn day_bounds(date: NaiveDate) -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn save_event(
        &self,
        event: &NewStoredEvent,
        strangers: &[StrangerUpsert],
        role_updates: &[RoleUpdate],
        appearances: &[NewAppearance],
    ) -> RepoResult<Uuid> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO event_logs (id, video_filename, start_time, camera_location, llm_description)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(&event.video_filename)
        .bind(event.start_time)
        .bind(&event.camera_location)
        .bind(&event.llm_description)
        .execute(&mut *tx)
        .await?;

        // Materialize stranger buckets as fresh person rows and remember the
        // id each bucket resolved to.
        let mut stranger_ids: HashMap<&str, i64> = HashMap::new();
        for stranger in strangers {
            let (person_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO persons
                    (name, role, current_body_embedding, body_update_time, first_seen, last_seen)
                VALUES ($1, $2, $3, $4, $4, $4)
                RETURNING id
                "#,
            )
            .bind(&stranger.name)
            .bind(stranger.role)
            .bind(Vector::from(stranger.body_embedding.to_vec()))
            .bind(stranger.at)
            .fetch_one(&mut *tx)
            .await?;

            stranger_ids.insert(stranger.bucket_key.as_str(), person_id);
        }

        for update in role_updates {
            sqlx::query(
                r#"
                UPDATE persons
                SET role = $2,
                    last_seen = $3,
                    notes = COALESCE(notes || ' ', '') || $4
                WHERE id = $1
                "#,
            )
            .bind(update.person_id)
            .bind(update.role)
            .bind(update.at)
            .bind(&update.note)
            .execute(&mut *tx)
            .await?;
        }

        for appearance in appearances {
            let person_id = match &appearance.person {
                PersonRef::Known(id) => *id,
                PersonRef::Stranger(bucket_key) => *stranger_ids
                    .get(bucket_key.as_str())
                    .ok_or_else(|| {
                        RepositoryError::Invariant(format!(
                            "appearance references unmaterialized stranger bucket {bucket_key}"
                        ))
                    })?,
            };

            sqlx::query(
                r#"
                INSERT INTO event_appearances (event_id, person_id, match_method, body_embedding)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event.id)
            .bind(person_id)
            .bind(appearance.match_method.as_str())
            .bind(Vector::from(appearance.body_embedding.to_vec()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(event.id)
    }

    async fn find_by_date(&self, date: NaiveDate) -> RepoResult<Vec<StoredEvent>> {
        let (start, end) = day_bounds(date);

        let rows: Vec<EventLogRow> = sqlx::query_as(
            r#"
            SELECT id, video_filename, start_time, camera_location, llm_description
            FROM event_logs
            WHERE start_time >= $1 AND start_time < $2
            ORDER BY start_time
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredEvent {
                id: r.id,
                video_filename: r.video_filename,
                start_time: r.start_time,
                camera_location: r.camera_location,
                llm_description: r.llm_description,
            })
            .collect())
    }

    async fn distinct_dates(&self) -> RepoResult<Vec<NaiveDate>> {
        let rows: Vec<(NaiveDate,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT DATE(start_time) AS day
            FROM event_logs
            ORDER BY day
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    async fn find_events(&self, filter: &EventFilter) -> RepoResult<Vec<RetrievedEvent>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_index = 0usize;

        let mut next = || {
            bind_index += 1;
            bind_index
        };

        let mut date_binds: Vec<chrono::DateTime<Utc>> = Vec::new();
        if let Some((range_start, range_end)) = filter.date_range {
            let (start, _) = day_bounds(range_start);
            let (_, end) = day_bounds(range_end);
            conditions.push(format!(
                "el.start_time >= ${} AND el.start_time < ${}",
                next(),
                next()
            ));
            date_binds.push(start);
            date_binds.push(end);
        } else if let Some(date) = filter.date {
            let (start, end) = day_bounds(date);
            conditions.push(format!(
                "el.start_time >= ${} AND el.start_time < ${}",
                next(),
                next()
            ));
            date_binds.push(start);
            date_binds.push(end);
        }

        let person_index = filter.person_id.map(|_| next());
        if let Some(index) = person_index {
            conditions.push(format!("ea.person_id = ${index}"));
        }

        let keyword_index = filter.keyword.as_ref().map(|_| next());
        if let Some(index) = keyword_index {
            conditions.push(format!("el.llm_description ILIKE ${index}"));
        }

        let where_clause = if conditions.is_empty() {
            "TRUE".to_string()
        } else {
            conditions.join(" AND ")
        };

        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let sql = format!(
            r#"
            SELECT el.id AS event_id,
                   el.start_time,
                   el.camera_location,
                   el.llm_description,
                   el.video_filename,
                   ea.id AS appearance_id,
                   ea.person_id,
                   ea.match_method,
                   p.name AS person_name,
                   p.role AS person_role
            FROM event_logs el
            JOIN event_appearances ea ON ea.event_id = el.id
            LEFT JOIN persons p ON p.id = ea.person_id
            WHERE {where_clause}
            ORDER BY el.start_time DESC, ea.id
            LIMIT {limit}
            "#
        );

        let mut query = sqlx::query_as::<_, RetrievalRow>(&sql);
        for bind in &date_binds {
            query = query.bind(*bind);
        }
        if let Some(person_id) = filter.person_id {
            query = query.bind(person_id);
        }
        if let Some(keyword) = &filter.keyword {
            query = query.bind(format!("%{keyword}%"));
        }

        let rows = query.fetch_all(&self.pool).await?;

        // Regroup the joined rows by event, preserving time order.
        let mut events: Vec<RetrievedEvent> = Vec::new();
        let mut index_by_id: HashMap<Uuid, usize> = HashMap::new();

        for row in rows {
            let entry_index = *index_by_id.entry(row.event_id).or_insert_with(|| {
                events.push(RetrievedEvent {
                    event_id: row.event_id,
                    start_time: row.start_time,
                    camera_location: row.camera_location.clone(),
                    llm_description: row.llm_description.clone(),
                    video_filename: row.video_filename.clone(),
                    appearances: Vec::new(),
                });
                events.len() - 1
            });

            let match_method = MatchMethod::parse(&row.match_method).ok_or_else(|| {
                RepositoryError::Invariant(format!(
                    "unknown match_method '{}' on appearance {}",
                    row.match_method, row.appearance_id
                ))
            })?;

            events[entry_index].appearances.push(RetrievedAppearance {
                appearance_id: row.appearance_id,
                person_id: row.person_id,
                match_method,
                person_name: row.person_name,
                person_role: row.person_role,
                snapshot_path: None,
            });
        }

        Ok(events)
    }

    async fn count(&self) -> RepoResult<i64> {
        let result: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM event_logs"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0)
    }

    async fn clear_store(&self, purge_enrollment: bool) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"DELETE FROM event_appearances"#)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM event_logs"#)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM daily_summaries"#)
            .execute(&mut *tx)
            .await?;

        if purge_enrollment {
            sqlx::query(r#"DELETE FROM person_faces"#)
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM persons"#)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(r#"DELETE FROM persons WHERE role <> 'owner'"#)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
