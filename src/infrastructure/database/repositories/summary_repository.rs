//! Summary Repository Implementation
//!
//! Postgres-backed daily summary store with idempotent upsert by date.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::domain::entities::DailySummary;
use crate::domain::repositories::{RepoResult, SummaryRepository};
use crate::infrastructure::database::models::DailySummaryRow;

/// PostgreSQL daily summary repository.
pub struct PgSummaryRepository {
    pool: PgPool,
}

impl PgSummaryRepository {
    /// Creates a new summary repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_summary(row: DailySummaryRow) -> DailySummary {
        DailySummary {
            id: row.id,
            summary_date: row.summary_date,
            summary_text: row.summary_text,
            total_events: row.total_events,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl SummaryRepository for PgSummaryRepository {
    async fn upsert(
        &self,
        date: NaiveDate,
        summary_text: &str,
        total_events: i32,
    ) -> RepoResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO daily_summaries (summary_date, summary_text, total_events, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (summary_date) DO UPDATE SET
                summary_text = EXCLUDED.summary_text,
                total_events = EXCLUDED.total_events,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(date)
        .bind(summary_text)
        .bind(total_events)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_date(&self, date: NaiveDate) -> RepoResult<Option<DailySummary>> {
        let row: Option<DailySummaryRow> = sqlx::query_as(
            r#"
            SELECT id, summary_date, summary_text, total_events, created_at, updated_at
            FROM daily_summaries
            WHERE summary_date = $1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_summary))
    }

    async fn find_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepoResult<Vec<DailySummary>> {
        let rows: Vec<DailySummaryRow> = sqlx::query_as(
            r#"
            SELECT id, summary_date, summary_text, total_events, created_at, updated_at
            FROM daily_summaries
            WHERE summary_date BETWEEN $1 AND $2
            ORDER BY summary_date DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_summary).collect())
    }

    async fn find_recent(&self, limit: i64) -> RepoResult<Vec<DailySummary>> {
        let rows: Vec<DailySummaryRow> = sqlx::query_as(
            r#"
            SELECT id, summary_date, summary_text, total_events, created_at, updated_at
            FROM daily_summaries
            ORDER BY summary_date DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_summary).collect())
    }
}
