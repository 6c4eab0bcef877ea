//! Role Classifier
//!
//! Infers behavioural roles from the accepted event summary using cue
//! patterns. Pattern sets are configuration, not code: deployments tune the
//! cue lists without rebuilding. Only the strong cue set (explicit parcel
//! handling) may demote a confirmed family member to a visitor role.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::entities::{Event, ResolvedRole};

/// Cue pattern sets per inferable role, plus the strong cues that may
/// override family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleCueConfig {
    pub delivery: Vec<String>,
    pub service: Vec<String>,
    pub visitor: Vec<String>,
    /// Strong cues: explicit parcel-holding phrasing. Only these justify
    /// overriding a family identity.
    pub strong_delivery: Vec<String>,
}

impl Default for RoleCueConfig {
    fn default() -> Self {
        Self {
            delivery: vec![
                "快递".into(),
                "包裹".into(),
                "配送".into(),
                "送货".into(),
                "送餐".into(),
                "外卖".into(),
                "投递".into(),
                "签收".into(),
                "快递单".into(),
                "配送单".into(),
            ],
            service: vec![
                "维修".into(),
                "清洁".into(),
                "保洁".into(),
                "安装".into(),
                "检修".into(),
                "工具箱".into(),
                "维修工具".into(),
                "清洁工具".into(),
            ],
            visitor: vec![
                "访客".into(),
                "拜访".into(),
                "来访".into(),
                "客人".into(),
                "敲门".into(),
                "按门铃".into(),
            ],
            strong_delivery: vec![
                "拿着.*包裹".into(),
                "拿着.*快递".into(),
                "拿着.*盒子".into(),
                "拿着.*箱子".into(),
                "送.*包裹".into(),
                "送.*快递".into(),
            ],
        }
    }
}

/// One inferred role with its cue score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleInference {
    pub role: ResolvedRole,
    pub score: usize,
    pub strong: bool,
}

/// Behaviour-based role classifier.
pub struct RoleClassifier {
    delivery: Vec<Regex>,
    service: Vec<Regex>,
    visitor: Vec<Regex>,
    strong_delivery: Vec<Regex>,
}

impl RoleClassifier {
    pub fn new(config: &RoleCueConfig) -> Self {
        Self {
            delivery: compile(&config.delivery, "delivery"),
            service: compile(&config.service, "service"),
            visitor: compile(&config.visitor, "visitor"),
            strong_delivery: compile(&config.strong_delivery, "strong_delivery"),
        }
    }

    /// Scores the summary against each cue set and returns the best-scoring
    /// role, if any cue matched at all.
    pub fn classify(&self, description: &str) -> Option<RoleInference> {
        if description.is_empty() {
            return None;
        }

        let mut best: Option<(ResolvedRole, usize)> = None;
        for (role, patterns) in [
            (ResolvedRole::Delivery, &self.delivery),
            (ResolvedRole::Service, &self.service),
            (ResolvedRole::Visitor, &self.visitor),
        ] {
            let score: usize = patterns
                .iter()
                .map(|p| p.find_iter(description).count())
                .sum();
            if score > 0 && best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((role, score));
            }
        }

        let (role, score) = best?;

        let strong = self
            .strong_delivery
            .iter()
            .any(|p| p.is_match(description));

        Some(RoleInference {
            role,
            score,
            strong,
        })
    }

    /// Applies behavioural inference to an event's people. Family roles are
    /// only overridden when a strong cue is present; the stranger bucket is
    /// always eligible.
    pub fn apply_to_event(&self, event: &mut Event) {
        let summary = match event.summary_text.as_deref() {
            Some(text) => text,
            None => return,
        };

        let Some(inference) = self.classify(summary) else {
            return;
        };

        info!(
            role = ?inference.role,
            score = inference.score,
            strong = inference.strong,
            "Behavioural role inferred from summary"
        );

        for (person_id, activity) in event.people_info.clone() {
            let is_family = matches!(
                activity.role,
                ResolvedRole::Family | ResolvedRole::SuspectedFamily
            );

            if is_family && !(inference.strong && inference.role == ResolvedRole::Delivery) {
                continue;
            }

            event.inferred_roles.insert(person_id, inference.role);
        }

        if event.has_strangers {
            event.stranger_inferred_role = Some(inference.role);
        }
    }
}

fn compile(patterns: &[String], set_name: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(set = set_name, pattern = %pattern, error = %e, "Skipping invalid cue pattern");
                None
            }
        })
        .collect()
}
