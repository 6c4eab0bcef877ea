//! RAG Synthesizer
//!
//! Composes the grounded answer from retrieved evidence. Never throws: zero
//! evidence returns a fixed polite message without touching the LLM, and an
//! LLM failure degrades to a deterministic stitching of the top evidence.

use std::sync::Arc;

use tracing::{info, warn};

use crate::application::services::query_parser::{ParsedQuery, QueryIntent};
use crate::application::services::retriever::Evidence;
use crate::domain::gateways::{GenerationOptions, LlmGateway};

/// Generation settings for answers.
const ANSWER_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.3,
    max_tokens: 512,
};

/// Evidence items included in the prompt.
const PROMPT_EVIDENCE_CAP: usize = 5;

/// Evidence items stitched into the deterministic fallback answer.
const FALLBACK_EVIDENCE_CAP: usize = 3;

/// Fixed reply for questions with no matching records.
pub const NO_RECORDS_ANSWER: &str = "抱歉，我没有找到与您的问题相关的记录。请尝试调整查询条件，比如：\n- 检查日期是否正确\n- 确认人物名称\n- 使用不同的关键词";

/// Final answer payload.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub evidence_count: usize,
    pub has_images: bool,
    pub images: Vec<String>,
}

/// Synthesizes grounded answers from evidence.
pub struct RagSynthesizer {
    llm: Arc<dyn LlmGateway>,
}

impl RagSynthesizer {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        Self { llm }
    }

    /// Answers a question from evidence. This path never errors outward.
    pub async fn answer(
        &self,
        question: &str,
        query: &ParsedQuery,
        evidence: &[Evidence],
    ) -> RagAnswer {
        if evidence.is_empty() {
            info!("No evidence, returning fixed no-records answer");
            return RagAnswer {
                answer: NO_RECORDS_ANSWER.to_string(),
                evidence_count: 0,
                has_images: false,
                images: Vec::new(),
            };
        }

        let images = collect_images(evidence);

        let system_prompt = build_system_prompt(query);
        let user_prompt = build_user_prompt(question, evidence);

        let answer = match self
            .llm
            .generate(&system_prompt, &user_prompt, ANSWER_OPTIONS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!("LLM answer unavailable, stitching evidence descriptions");
                stitch_fallback(evidence)
            }
        };

        RagAnswer {
            answer,
            evidence_count: evidence.len(),
            has_images: !images.is_empty(),
            images,
        }
    }
}

fn build_system_prompt(query: &ParsedQuery) -> String {
    let mut prompt = String::from(
        "你是一个智能家庭安防系统的问答助手。你的任务是根据检索到的数据库记录，回答用户的问题。\n\n\
要求：\n\
1. 必须使用中文回答\n\
2. 基于检索到的证据，不要编造信息\n\
3. 如果检索到的信息不足，明确说明\n\
4. 回答要简洁、准确、人性化\n\
5. 如果涉及时间，使用具体的时间格式（如\"2025年9月1日 18:00\"）",
    );

    match query.intent {
        QueryIntent::DescribeAppearance => prompt.push_str(
            "\n6. 如果用户询问衣着，基于可用的外观证据描述，或说明无法从当前数据中确定具体衣着。",
        ),
        QueryIntent::QueryTime => prompt.push_str("\n6. 如果用户询问时间，提供具体的时间信息。"),
        QueryIntent::QueryLocation => {
            prompt.push_str("\n6. 如果用户询问位置，提供具体的摄像头位置信息。")
        }
        QueryIntent::QuerySummary | QueryIntent::General => {}
    }

    prompt
}

fn build_user_prompt(question: &str, evidence: &[Evidence]) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("用户问题：{question}\n"));
    parts.push("检索到的证据：".to_string());

    for (index, item) in evidence.iter().take(PROMPT_EVIDENCE_CAP).enumerate() {
        let number = index + 1;
        match item {
            Evidence::Summary(summary) => {
                parts.push(format!("\n[{number}] 每日总结:"));
                parts.push(format!("   日期: {}", summary.summary_date));
                parts.push(format!("   内容: {}", summary.summary_text));
            }
            Evidence::Detail(event) => {
                parts.push(format!("\n[{number}] 事件记录:"));
                parts.push(format!(
                    "   时间: {}",
                    event.start_time.format("%Y-%m-%d %H:%M:%S")
                ));
                parts.push(format!("   位置: {}", event.camera_location));
                parts.push(format!("   描述: {}", event.llm_description));

                if !event.appearances.is_empty() {
                    parts.push("   涉及人物:".to_string());
                    for appearance in &event.appearances {
                        let name = appearance
                            .person_name
                            .clone()
                            .unwrap_or_else(|| format!("Person_{}", appearance.person_id));
                        parts.push(format!(
                            "     - {name} (识别方式: {})",
                            appearance.match_method.as_str()
                        ));
                    }
                }
            }
        }
    }

    parts.push("\n请根据以上证据，回答用户的问题。".to_string());
    parts.join("\n")
}

/// Deterministic answer used when the LLM is unavailable.
fn stitch_fallback(evidence: &[Evidence]) -> String {
    let mut lines = vec!["根据记录：".to_string()];

    for item in evidence.iter().take(FALLBACK_EVIDENCE_CAP) {
        match item {
            Evidence::Summary(summary) => {
                lines.push(format!("{}：{}", summary.summary_date, summary.summary_text))
            }
            Evidence::Detail(event) => lines.push(format!(
                "{} [{}] {}",
                event.start_time.format("%Y-%m-%d %H:%M:%S"),
                event.camera_location,
                event.llm_description
            )),
        }
    }

    lines.join("\n")
}

fn collect_images(evidence: &[Evidence]) -> Vec<String> {
    evidence
        .iter()
        .filter_map(|item| match item {
            Evidence::Detail(event) => Some(event),
            Evidence::Summary(_) => None,
        })
        .flat_map(|event| event.appearances.iter())
        .filter_map(|appearance| appearance.snapshot_path.clone())
        .collect()
}
