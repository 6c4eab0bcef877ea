//! Daily Summarizer
//!
//! Rolls one calendar day of stored events into a narrative summary with
//! three fixed sections, upserted idempotently on the date key.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::application::error::AppResult;
use crate::domain::entities::StoredEvent;
use crate::domain::gateways::{GenerationOptions, LlmGateway};
use crate::domain::repositories::{EventRepository, SummaryRepository};

/// Generation settings for daily summaries.
const DAILY_SUMMARY_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.3,
    max_tokens: 512,
};

const SYSTEM_PROMPT: &str = "你是一个专业的家庭安防分析师。你的任务是根据提供的事件日志，生成每日活动总结。\n\n\
要求：\n\
1. 规律分析：识别家人的出门和回家时间\n\
2. 安全提醒：明确提及任何与陌生人（未知人员）的互动\n\
3. 异常标记：突出敏感时段的活动（如 00:00 - 05:00）\n\
4. 简洁性：不要列举每个事件，而是将相似事件归类\n\
5. 客观性：基于提供的时间线信息，不要推断或添加未明确提到的事件\n\n\
输出格式（中文）：\n\
- [家人动态]: ...\n\
- [访客/陌生人]: ... (如果没有，说\"无\")\n\
- [异常关注]: ... (如果没有，说\"无\")";

/// Result of a batch summarization run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummaryReport {
    pub summarized: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
    pub failed: Vec<NaiveDate>,
}

/// Generates and upserts daily narrative summaries.
pub struct DailySummarizer {
    event_repo: Arc<dyn EventRepository>,
    summary_repo: Arc<dyn SummaryRepository>,
    llm: Arc<dyn LlmGateway>,
}

impl DailySummarizer {
    pub fn new(
        event_repo: Arc<dyn EventRepository>,
        summary_repo: Arc<dyn SummaryRepository>,
        llm: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            event_repo,
            summary_repo,
            llm,
        }
    }

    /// Summarizes one date. Returns the summary record id, or None when the
    /// date has no events or already has a summary and `force` is false.
    pub async fn summarize_date(&self, date: NaiveDate, force: bool) -> AppResult<Option<i64>> {
        if !force {
            if let Some(existing) = self.summary_repo.find_by_date(date).await? {
                info!(%date, id = existing.id, "Summary already exists, skipping");
                return Ok(Some(existing.id));
            }
        }

        let events = self.event_repo.find_by_date(date).await?;
        if events.is_empty() {
            info!(%date, "No events for date, nothing to summarize");
            return Ok(None);
        }

        let timeline = format_timeline(&events);
        let summary_text = self.generate_summary(&timeline, date).await;

        let id = self
            .summary_repo
            .upsert(date, &summary_text, events.len() as i32)
            .await?;

        info!(%date, id, events = events.len(), "Daily summary stored");
        Ok(Some(id))
    }

    /// Summarizes every date that has events, skipping already-summarized
    /// dates unless `force`.
    pub async fn summarize_all(&self, force: bool) -> AppResult<BatchSummaryReport> {
        let dates = self.event_repo.distinct_dates().await?;
        info!(dates = dates.len(), "Batch daily summarization");

        let mut report = BatchSummaryReport::default();

        for date in dates {
            if !force && self.summary_repo.find_by_date(date).await?.is_some() {
                report.skipped.push(date);
                continue;
            }

            match self.summarize_date(date, force).await {
                Ok(Some(_)) => report.summarized.push(date),
                Ok(None) => report.skipped.push(date),
                Err(e) => {
                    warn!(%date, error = %e, "Daily summary failed, continuing");
                    report.failed.push(date);
                }
            }
        }

        info!(
            summarized = report.summarized.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Batch summarization complete"
        );

        Ok(report)
    }

    async fn generate_summary(&self, timeline: &str, date: NaiveDate) -> String {
        let user_prompt = format!(
            "以下是 {} 的完整事件时间线：\n\n{}\n\n\
请根据以上时间线信息，生成一条详细的每日活动总结。要求：\n\
1. 提取家人的日常规律（出门时间、回家时间等）\n\
2. 明确标记任何陌生人或访客的出现\n\
3. 关注异常时段的活动\n\
4. 使用简洁的语言，不要重复列举每个事件\n\
5. 严格按照输出格式生成总结\n\n\
输出格式（中文）：\n\
- [家人动态]: ...\n\
- [访客/陌生人]: ... (如果没有，说\"无\")\n\
- [异常关注]: ... (如果没有，说\"无\")",
            date.format("%Y年%m月%d日"),
            timeline
        );

        match self
            .llm
            .generate(SYSTEM_PROMPT, &user_prompt, DAILY_SUMMARY_OPTIONS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(%date, "LLM daily summary unavailable, storing timeline digest");
                format!("{date}，共记录事件时间线：\n{timeline}")
            }
        }
    }
}

/// One line per event: `HH:MM:SS [camera] : description`.
fn format_timeline(events: &[StoredEvent]) -> String {
    events
        .iter()
        .map(|event| {
            format!(
                "{} [{}] : {}",
                event.start_time.format("%H:%M:%S"),
                event.camera_location,
                event.llm_description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
