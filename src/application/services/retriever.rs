//! Retriever
//!
//! Fetches the evidence a question needs: daily summaries for summary-type
//! questions, joined event/appearance rows for detail questions. A keyword
//! filter that matches nothing is loosened once before giving up.

use std::sync::Arc;

use tracing::info;

use crate::application::error::AppResult;
use crate::application::services::query_parser::{ParsedQuery, QueryType};
use crate::domain::entities::DailySummary;
use crate::domain::repositories::{EventFilter, EventRepository, RetrievedEvent, SummaryRepository};

/// Maximum detail events fetched per question.
const DETAIL_EVENT_CAP: i64 = 50;

/// Most recent summaries returned when no date was parsed.
const RECENT_SUMMARY_CAP: i64 = 10;

/// One piece of evidence for the synthesizer.
#[derive(Debug, Clone)]
pub enum Evidence {
    Summary(DailySummary),
    Detail(RetrievedEvent),
}

/// Retrieves evidence matching a parsed query.
pub struct Retriever {
    event_repo: Arc<dyn EventRepository>,
    summary_repo: Arc<dyn SummaryRepository>,
}

impl Retriever {
    pub fn new(
        event_repo: Arc<dyn EventRepository>,
        summary_repo: Arc<dyn SummaryRepository>,
    ) -> Self {
        Self {
            event_repo,
            summary_repo,
        }
    }

    pub async fn retrieve(&self, query: &ParsedQuery) -> AppResult<Vec<Evidence>> {
        match query.query_type {
            QueryType::Summary => self.retrieve_summaries(query).await,
            QueryType::Detail => self.retrieve_details(query).await,
        }
    }

    async fn retrieve_summaries(&self, query: &ParsedQuery) -> AppResult<Vec<Evidence>> {
        let summaries = if let Some((start, end)) = query.date_range {
            self.summary_repo.find_in_range(start, end).await?
        } else if let Some(date) = query.date {
            self.summary_repo
                .find_by_date(date)
                .await?
                .into_iter()
                .collect()
        } else {
            self.summary_repo.find_recent(RECENT_SUMMARY_CAP).await?
        };

        info!(count = summaries.len(), "Retrieved daily summaries");
        Ok(summaries.into_iter().map(Evidence::Summary).collect())
    }

    async fn retrieve_details(&self, query: &ParsedQuery) -> AppResult<Vec<Evidence>> {
        let filter = EventFilter {
            date: query.date,
            date_range: query.date_range,
            person_id: query.person_id,
            keyword: query.keyword.clone(),
            limit: DETAIL_EVENT_CAP,
        };

        let mut events = self.event_repo.find_events(&filter).await?;

        // Loosening pass: the action keyword is a hint, not a hard filter.
        if events.is_empty() && filter.keyword.is_some() {
            info!(
                keyword = ?filter.keyword,
                "Keyword matched nothing, rerunning without it"
            );
            let loosened = EventFilter {
                keyword: None,
                ..filter
            };
            events = self.event_repo.find_events(&loosened).await?;
        }

        info!(count = events.len(), "Retrieved detail events");
        Ok(events.into_iter().map(Evidence::Detail).collect())
    }
}
