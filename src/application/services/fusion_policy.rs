//! Fusion Policy
//!
//! Decides whether two adjacent clips belong to the same event. Both the
//! time rule and the identity rule must hold.

use crate::domain::entities::ClipResult;

/// Fusion policy thresholds (seconds).
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Maximum start-time gap for any connection.
    pub time_threshold_secs: i64,
    /// Tighter gap for consecutive stranger-only clips.
    pub stranger_gap_secs: i64,
    /// Tightest gap for a family/stranger interaction hypothesis.
    pub interaction_gap_secs: i64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            time_threshold_secs: 60,
            stranger_gap_secs: 10,
            interaction_gap_secs: 5,
        }
    }
}

/// Connectivity predicate over adjacent clips.
pub struct FusionPolicy {
    config: FusionConfig,
}

impl FusionPolicy {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// True when `current` should join the event containing `last`.
    pub fn connected(&self, last: &ClipResult, current: &ClipResult) -> bool {
        self.time_rule(last, current) && self.identity_rule(last, current)
    }

    /// 0 <= gap < threshold. Negative gaps indicate an ordering bug upstream
    /// and never connect.
    fn time_rule(&self, last: &ClipResult, current: &ClipResult) -> bool {
        let gap = (current.start_time - last.start_time).num_seconds();
        if gap < 0 {
            tracing::warn!(
                last = %last.start_time,
                current = %current.start_time,
                "Clips out of order at fusion policy"
            );
            return false;
        }
        gap < self.config.time_threshold_secs
    }

    /// At least one of: shared person ids; both stranger-only within the
    /// stranger gap; family-only vs stranger-only within the interaction gap.
    fn identity_rule(&self, last: &ClipResult, current: &ClipResult) -> bool {
        let last_people = last.people_profile();
        let current_people = current.people_profile();

        if last_people
            .person_ids
            .intersection(&current_people.person_ids)
            .next()
            .is_some()
        {
            return true;
        }

        let gap = (current.start_time - last.start_time).num_seconds();

        if last_people.all_strangers()
            && current_people.all_strangers()
            && gap < self.config.stranger_gap_secs
        {
            return true;
        }

        // Interaction hypothesis: family answering the door for a stranger.
        let interaction = (last_people.family_only() && current_people.all_strangers())
            || (last_people.all_strangers() && current_people.family_only());
        if interaction && gap < self.config.interaction_gap_secs {
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        Detection, ResolutionMethod, ResolvedIdentity, ResolvedRole,
    };
    use crate::domain::value_objects::BoundingBox;
    use chrono::{TimeZone, Utc};

    fn detection(person_id: Option<i64>, role: ResolvedRole) -> Detection {
        Detection {
            frame_index: 0,
            bbox: BoundingBox::new(0, 0, 100, 200),
            confidence: 0.9,
            face_embedding: None,
            body_embedding: None,
            track_id: None,
            identity: ResolvedIdentity {
                person_id,
                role,
                method: ResolutionMethod::New,
                confidence: 0.0,
            },
        }
    }

    fn clip(at_secs: i64, detections: Vec<Detection>) -> ClipResult {
        ClipResult {
            start_time: Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap()
                + chrono::Duration::seconds(at_secs),
            camera: "doorbell".to_string(),
            video_path: "videos/clip.mp4".into(),
            video_duration_secs: 10.0,
            frames: vec![detections],
        }
    }

    fn family(person_id: i64) -> Detection {
        detection(Some(person_id), ResolvedRole::Family)
    }

    fn stranger() -> Detection {
        detection(None, ResolvedRole::Stranger)
    }

    fn policy() -> FusionPolicy {
        FusionPolicy::new(FusionConfig::default())
    }

    #[test]
    fn shared_person_within_window_connects() {
        let a = clip(0, vec![family(1)]);
        let b = clip(30, vec![family(1)]);
        assert!(policy().connected(&a, &b));
    }

    #[test]
    fn shared_person_beyond_window_disconnects() {
        let a = clip(0, vec![family(1)]);
        let b = clip(90, vec![family(1)]);
        assert!(!policy().connected(&a, &b));
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let a = clip(0, vec![family(1)]);
        let b = clip(60, vec![family(1)]);
        assert!(!policy().connected(&a, &b));
    }

    #[test]
    fn different_people_disconnect() {
        let a = clip(0, vec![family(1)]);
        let b = clip(10, vec![family(2)]);
        assert!(!policy().connected(&a, &b));
    }

    #[test]
    fn stranger_only_clips_connect_within_tight_gap() {
        let a = clip(0, vec![stranger()]);
        let b = clip(8, vec![stranger()]);
        assert!(policy().connected(&a, &b));
    }

    #[test]
    fn stranger_only_clips_disconnect_beyond_tight_gap() {
        let a = clip(0, vec![stranger()]);
        let b = clip(15, vec![stranger()]);
        assert!(!policy().connected(&a, &b));
    }

    #[test]
    fn family_stranger_interaction_connects_within_gap() {
        let a = clip(0, vec![family(1)]);
        let b = clip(3, vec![stranger()]);
        assert!(policy().connected(&a, &b));
        // And symmetrically.
        assert!(policy().connected(&b, &clip(6, vec![family(1)])));
    }

    #[test]
    fn family_stranger_interaction_disconnects_beyond_gap() {
        let a = clip(0, vec![family(1)]);
        let b = clip(7, vec![stranger()]);
        assert!(!policy().connected(&a, &b));
    }

    #[test]
    fn out_of_order_clips_never_connect() {
        let a = clip(30, vec![family(1)]);
        let b = clip(0, vec![family(1)]);
        assert!(!policy().connected(&a, &b));
    }
}
