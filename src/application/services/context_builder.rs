//! Context Builder
//!
//! Turns a fused event into the structured prompt the LLM reasons over: a
//! per-clip timeline with role labels, camera-semantic positions, activity
//! levels and optional spatial/type hints, finished with a fixed task
//! instruction. The prompt is a pure function of (event, config).

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::domain::entities::{ClipResult, Event, ResolvedRole};
use crate::domain::value_objects::BoundingBox;

const OUTDOOR_KEYWORDS: [&str; 4] = ["outdoor", "doorbell", "gate", "yard"];
const INDOOR_KEYWORDS: [&str; 4] = ["indoor", "living", "room", "hall"];
const INDOOR_CAMERAS: [&str; 4] = [
    "indoor_living",
    "indoor_hall",
    "indoor_kitchen",
    "indoor_bedroom",
];

/// Heuristic event classification used only to append a gentle hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Delivery,
    Service,
    Visitor,
    Dangerous,
    Normal,
}

/// Prompt construction settings.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Camera id to human-readable place, used in people summaries.
    pub camera_places: HashMap<String, String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let camera_places = [
            ("doorbell", "门口"),
            ("outdoor_high", "庭院/车道"),
            ("outdoor_side", "侧院"),
            ("indoor_living", "客厅"),
            ("indoor_hall", "门厅"),
            ("indoor_kitchen", "厨房"),
            ("indoor_bedroom", "卧室"),
        ]
        .into_iter()
        .map(|(camera, place)| (camera.to_string(), place.to_string()))
        .collect();

        Self { camera_places }
    }
}

/// Builds LLM prompts from fused events.
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Builds the user prompt: timeline, optional hints, task instruction.
    pub fn build_user_prompt(&self, event: &Event) -> String {
        let mut lines: Vec<String> = Vec::new();

        let mut timeline: Vec<String> = Vec::new();
        for clip in &event.clips {
            let summary = self.summarize_clip_people(clip);
            if !summary.is_empty() {
                timeline.push(format!(
                    "- {} [{}]: {}",
                    clip.start_time.format("%H:%M:%S"),
                    clip.camera,
                    summary
                ));
            }
        }

        if !timeline.is_empty() {
            lines.push("时间线：".to_string());
            lines.extend(timeline);
        }

        if let Some(hint) = self.spatial_hint(event) {
            lines.push(format!("提示: {hint}"));
        }

        let kind = self.classify_event(event);
        if let Some(hint) = type_hint(kind) {
            lines.push(format!("提示: {hint}"));
        }

        lines.push("任务：根据以上时间线信息，生成一条详细的中文日志，描述这个事件的完整过程。".to_string());
        lines.push("要求：".to_string());
        lines.push("- 描述人物的具体行为（出现、移动、停留等）".to_string());
        lines.push("- 说明位置变化（如果涉及多个摄像头）".to_string());
        lines.push("- 体现时间顺序（先做什么，后做什么）".to_string());
        lines.push("- 不要使用\"详情见视频\"等通用描述，必须基于时间线生成具体描述".to_string());
        lines.push(
            "- 根据观察到的人物动作、特征和活动模式，自然地判断和描述事件类型（如：快递配送、服务维修、访客等）"
                .to_string(),
        );

        lines.join("\n")
    }

    /// Builds the system prompt defining the log-writer persona and the
    /// grounding rules.
    pub fn build_system_prompt(&self, event: &Event) -> String {
        let mut prompt = String::from(
            "你是一个智能家庭监控系统的日志生成助手。你的任务是根据监控视频的时间线信息，生成一条详细、准确的中文日志。\n\n\
规则：\n\
1. 必须使用中文\n\
2. 时间误差不能超过1分钟\n\
3. 如果是陌生人，必须描述衣着特征（如果信息可用）\n\
4. 保持客观、详细，避免主观判断\n\
5. 关注空间转移（如从\"庭院\"到\"正门\"意味着\"回家\"），详细描述人物的移动路径\n\
6. 如果多个摄像头同时检测到同一人，合并为一条日志，但要说明在不同位置的出现\n\
7. 输出格式：时间 + 详细的事件描述（50-200字）\n\
8. 必须详细描述人物的具体行为（例如：拿着包裹、按门铃、等待、离开等）\n\
9. 禁止使用\"详情见视频\"、\"详见视频\"等通用描述，必须基于时间线信息生成具体描述\n\
10. 严格基于提供的时间线信息生成日志，不要推断或添加时间线中未明确提到的人物或事件\n\
11. 如果时间线中只提到\"家人\"，不要添加\"陌生人\"的描述；反之亦然",
        );

        let has_family = event
            .people_info
            .values()
            .any(|info| info.role == ResolvedRole::Family);

        match (has_family, event.has_strangers) {
            (true, false) => prompt.push_str("\n\n注意：本次事件涉及家人，请使用友好的语气。"),
            (false, true) => {
                prompt.push_str("\n\n注意：本次事件涉及陌生人，请详细描述并保持警惕性。")
            }
            (true, true) => {
                prompt.push_str("\n\n注意：本次事件涉及家人和陌生人，请区分描述。")
            }
            (false, false) => {}
        }

        prompt
    }

    /// Summarizes the distinct (person, role) pairs seen in one clip.
    fn summarize_clip_people(&self, clip: &ClipResult) -> String {
        struct Seen {
            detection_count: usize,
            first_frame: usize,
            last_frame: usize,
            bboxes: Vec<BoundingBox>,
        }

        let mut seen: BTreeMap<(Option<i64>, u8), Seen> = BTreeMap::new();

        for detection in clip.detections() {
            let key = (detection.person_id(), role_rank(detection.role()));
            let entry = seen.entry(key).or_insert(Seen {
                detection_count: 0,
                first_frame: detection.frame_index,
                last_frame: detection.frame_index,
                bboxes: Vec::new(),
            });
            entry.detection_count += 1;
            entry.first_frame = entry.first_frame.min(detection.frame_index);
            entry.last_frame = entry.last_frame.max(detection.frame_index);
            entry.bboxes.push(detection.bbox);
        }

        let mut summaries: Vec<String> = Vec::new();

        for ((person_id, rank), info) in &seen {
            let frame_span = info.last_frame - info.first_frame + 1;
            let moved = detect_movement(&info.bboxes);
            let level = activity_level(info.detection_count, frame_span, moved);

            let mut desc = match rank_role(*rank) {
                ResolvedRole::Family => {
                    format!("家人({})", person_label(*person_id))
                }
                ResolvedRole::SuspectedFamily => {
                    format!("疑似家人({})", person_label(*person_id))
                }
                ResolvedRole::Stranger | ResolvedRole::Unknown => "陌生人".to_string(),
                _ => "未知人物".to_string(),
            };

            let mut parts: Vec<String> = Vec::new();

            if let Some(place) = self.config.camera_places.get(&clip.camera) {
                parts.push(format!("在{place}"));
            }

            parts.push(
                match (level, moved) {
                    (ActivityLevel::High, true) => "持续活动并移动",
                    (ActivityLevel::High, false) => "持续停留",
                    (ActivityLevel::Medium, true) => "活动并移动",
                    (ActivityLevel::Medium, false) => "短暂停留",
                    (ActivityLevel::Low, _) => "短暂出现",
                }
                .to_string(),
            );

            // Sampling runs at about one frame per second, so the frame span
            // approximates seconds.
            if frame_span > 5 {
                parts.push(format!("约{frame_span}秒"));
            }

            desc.push('，');
            desc.push_str(&parts.join(""));
            summaries.push(desc);
        }

        summaries.dedup();
        summaries.join("、")
    }

    /// Hint emitted when the event spans both outdoor and indoor cameras.
    fn spatial_hint(&self, event: &Event) -> Option<String> {
        if event.cameras.len() < 2 {
            return None;
        }

        let has_outdoor = event.cameras.iter().any(|cam| {
            OUTDOOR_KEYWORDS
                .iter()
                .any(|kw| cam.to_lowercase().contains(kw))
        });
        let has_indoor = event.cameras.iter().any(|cam| {
            INDOOR_KEYWORDS
                .iter()
                .any(|kw| cam.to_lowercase().contains(kw))
        });

        if has_outdoor && has_indoor {
            Some("人物从室外移动到室内".to_string())
        } else {
            None
        }
    }

    /// Coarse event-kind heuristics used only for the gentle type hint.
    pub fn classify_event(&self, event: &Event) -> EventKind {
        if !event.has_strangers {
            return EventKind::Normal;
        }

        let has_doorbell = event.cameras.iter().any(|c| c == "doorbell");
        let has_indoor = event
            .cameras
            .iter()
            .any(|c| INDOOR_CAMERAS.contains(&c.as_str()));
        let has_outdoor = event.cameras.iter().any(|c| !INDOOR_CAMERAS.contains(&c.as_str()));

        // Delivery: stranger at the doorbell for a short stay.
        if has_doorbell && (event.duration_secs > 0.0 && event.duration_secs < 120.0
            || event.clips.len() <= 3)
        {
            return EventKind::Delivery;
        }

        // Service: long stay or movement across indoor and outdoor zones.
        if event.duration_secs > 300.0 || (has_indoor && has_outdoor) {
            return EventKind::Service;
        }

        // Visitor: entered from the doorbell into the house.
        if has_doorbell && has_indoor {
            return EventKind::Visitor;
        }

        EventKind::Normal
    }
}

fn type_hint(kind: EventKind) -> Option<String> {
    let hint = match kind {
        EventKind::Delivery => "注意观察人物是否拿着物品、在门口短暂停留等特征",
        EventKind::Service => "注意观察人物是否携带工具、长时间停留等特征",
        EventKind::Dangerous => "注意观察人物行为是否异常、是否有可疑动作等特征",
        EventKind::Visitor => "注意观察人物是否从门口进入室内等特征",
        EventKind::Normal => return None,
    };
    Some(format!(
        "根据观察到的人物动作和活动模式，{hint}，自然地判断事件类型"
    ))
}

fn person_label(person_id: Option<i64>) -> String {
    match person_id {
        Some(id) => format!("Person_{id}"),
        None => "未知".to_string(),
    }
}

// Roles collapse to a small rank so the BTreeMap key stays Ord.
fn role_rank(role: ResolvedRole) -> u8 {
    match role {
        ResolvedRole::Family => 0,
        ResolvedRole::SuspectedFamily => 1,
        ResolvedRole::Stranger => 2,
        ResolvedRole::Unknown => 3,
        ResolvedRole::Visitor => 4,
        ResolvedRole::Delivery => 5,
        ResolvedRole::Service => 6,
    }
}

fn rank_role(rank: u8) -> ResolvedRole {
    match rank {
        0 => ResolvedRole::Family,
        1 => ResolvedRole::SuspectedFamily,
        2 => ResolvedRole::Stranger,
        3 => ResolvedRole::Unknown,
        4 => ResolvedRole::Visitor,
        5 => ResolvedRole::Delivery,
        _ => ResolvedRole::Service,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivityLevel {
    Low,
    Medium,
    High,
}

/// Detection density plus count decide the coarse activity level.
fn activity_level(detection_count: usize, frame_span: usize, _moved: bool) -> ActivityLevel {
    let density = if frame_span > 0 {
        detection_count as f64 / frame_span as f64
    } else {
        0.0
    };

    if density > 0.8 && detection_count > 10 {
        ActivityLevel::High
    } else if density > 0.5 && detection_count > 5 {
        ActivityLevel::Medium
    } else {
        ActivityLevel::Low
    }
}

/// True when the bbox center wandered more than 20% of the box size.
fn detect_movement(bboxes: &[BoundingBox]) -> bool {
    if bboxes.len() < 2 {
        return false;
    }

    let centers: Vec<(f32, f32)> = bboxes.iter().map(|b| b.center()).collect();

    let xs: Vec<f32> = centers.iter().map(|c| c.0).collect();
    let ys: Vec<f32> = centers.iter().map(|c| c.1).collect();

    let x_range = xs.iter().cloned().fold(f32::MIN, f32::max)
        - xs.iter().cloned().fold(f32::MAX, f32::min);
    let y_range = ys.iter().cloned().fold(f32::MIN, f32::max)
        - ys.iter().cloned().fold(f32::MAX, f32::min);

    let reference = &bboxes[0];
    let x_threshold = reference.width() as f32 * 0.2;
    let y_threshold = reference.height() as f32 * 0.2;

    (reference.width() > 0 && x_range > x_threshold)
        || (reference.height() > 0 && y_range > y_threshold)
}
