//! Daily Summary Entity
//!
//! One narrative record per calendar date, upserted on the date key.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A persisted daily narrative summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub id: i64,
    pub summary_date: NaiveDate,
    pub summary_text: String,
    pub total_events: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
