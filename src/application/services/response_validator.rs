//! Response Validator
//!
//! Cleans LLM output and checks it against the timeline for hallucinated
//! people classes. Flagged or empty responses fall back to a deterministic
//! template summary built from the event itself.

use regex::Regex;
use tracing::warn;

use crate::domain::entities::{Event, ResolvedRole};

const FAMILY_KEYWORDS: [&str; 5] = ["家人", "爸爸", "妈妈", "主人", "住户"];
const STRANGER_KEYWORDS: [&str; 6] = ["陌生人", "入侵", "可疑", "未授权", "闯入", "非法"];
const NEGATION_MARKERS: [&str; 4] = ["未", "没有", "无", "不"];

/// Number of characters scanned before a keyword for a negation.
const NEGATION_WINDOW: usize = 5;

/// Validation outcome for one LLM response.
#[derive(Debug, Clone)]
pub struct ValidatedSummary {
    pub summary_text: String,
    pub used_fallback: bool,
    pub warnings: Vec<String>,
}

/// Validates and cleans event summaries.
pub struct ResponseValidator {
    markdown_bold: Regex,
    markdown_italic: Regex,
    markdown_code: Regex,
    excess_newlines: Regex,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self {
            markdown_bold: Regex::new(r"\*\*([^*]+)\*\*").expect("static regex"),
            markdown_italic: Regex::new(r"\*([^*]+)\*").expect("static regex"),
            markdown_code: Regex::new(r"`([^`]+)`").expect("static regex"),
            excess_newlines: Regex::new(r"\n{3,}").expect("static regex"),
        }
    }

    /// Validates the raw LLM output against the event's prompt timeline.
    /// On empty output or a hallucination flag, substitutes the
    /// deterministic template summary.
    pub fn validate(&self, raw_response: &str, event: &Event) -> ValidatedSummary {
        if raw_response.trim().is_empty() {
            warn!("Empty LLM response, using fallback summary");
            return ValidatedSummary {
                summary_text: self.fallback_summary(event),
                used_fallback: true,
                warnings: vec!["empty response".to_string()],
            };
        }

        let cleaned = self.clean(raw_response);
        let warnings = self.check_hallucinations(&cleaned, event);

        if !warnings.is_empty() {
            warn!(?warnings, "Hallucination detected, using fallback summary");
            return ValidatedSummary {
                summary_text: self.fallback_summary(event),
                used_fallback: true,
                warnings,
            };
        }

        ValidatedSummary {
            summary_text: cleaned,
            used_fallback: false,
            warnings: Vec::new(),
        }
    }

    /// Strips trivial markdown and collapses runs of blank lines.
    fn clean(&self, text: &str) -> String {
        let text = self.markdown_bold.replace_all(text, "$1");
        let text = self.markdown_italic.replace_all(&text, "$1");
        let text = self.markdown_code.replace_all(&text, "$1");
        let text = self.excess_newlines.replace_all(&text, "\n\n");
        text.trim().to_string()
    }

    /// Flags people classes the output mentions but the timeline does not,
    /// unless the mention is negated within the preceding window.
    fn check_hallucinations(&self, text: &str, event: &Event) -> Vec<String> {
        let timeline = event.prompt_text.as_deref().unwrap_or("");
        let timeline_has_family = timeline.contains("家人");
        let timeline_has_stranger = timeline.contains("陌生人");

        let mut warnings = Vec::new();

        if !timeline_has_family && contains_unnegated(text, &FAMILY_KEYWORDS) {
            warnings.push("时间线中没有家人，但输出提到了家人".to_string());
        }

        if !timeline_has_stranger && contains_unnegated(text, &STRANGER_KEYWORDS) {
            warnings.push("时间线中没有陌生人，但输出提到了陌生人或入侵".to_string());
        }

        warnings
    }

    /// Deterministic template summary from start time, cameras and per-person
    /// cameras.
    pub fn fallback_summary(&self, event: &Event) -> String {
        let time_str = event.start_time.format("%H:%M").to_string();

        let camera_str = if event.cameras.is_empty() {
            "监控区域".to_string()
        } else if event.cameras.len() <= 2 {
            event.cameras.join("、")
        } else {
            format!(
                "{}等{}个位置",
                event.cameras[..2].join("、"),
                event.cameras.len()
            )
        };

        let mut people_details: Vec<String> = Vec::new();
        for (person_id, info) in &event.people_info {
            match info.role {
                ResolvedRole::Family | ResolvedRole::SuspectedFamily => {
                    match info.cameras.first() {
                        Some(camera) => people_details
                            .push(format!("家人(Person_{person_id})在{camera}")),
                        None => people_details.push(format!("家人(Person_{person_id})")),
                    }
                }
                _ => people_details.push("陌生人".to_string()),
            }
        }
        if event.has_strangers && !event.people_info.values().any(|i| i.role.is_stranger()) {
            people_details.push("陌生人".to_string());
        }
        people_details.dedup();

        if people_details.is_empty() {
            return format!("{time_str}，在{camera_str}未检测到人员活动。");
        }

        let people_str = people_details.join("，");
        if event.duration_secs > 0.0 {
            let duration_str = if event.duration_secs < 60.0 {
                format!("{:.0}秒", event.duration_secs)
            } else {
                format!("{:.1}分钟", event.duration_secs / 60.0)
            };
            format!("{time_str}，{people_str}出现，活动持续约{duration_str}。")
        } else {
            format!("{time_str}，{people_str}出现。")
        }
    }
}

/// True when any keyword appears without a negation marker in the preceding
/// window of characters.
fn contains_unnegated(text: &str, keywords: &[&str]) -> bool {
    let chars: Vec<char> = text.chars().collect();

    for keyword in keywords {
        let keyword_chars: Vec<char> = keyword.chars().collect();
        let mut start = 0usize;

        while start + keyword_chars.len() <= chars.len() {
            if chars[start..start + keyword_chars.len()] == keyword_chars[..] {
                let window_start = start.saturating_sub(NEGATION_WINDOW);
                let window: String = chars[window_start..start].iter().collect();
                let negated = NEGATION_MARKERS.iter().any(|neg| window.contains(neg));
                if !negated {
                    return true;
                }
            }
            start += 1;
        }
    }

    false
}
