//! Identity Refiner
//!
//! Re-evaluates borderline identities using event-level evidence. Expressed
//! as a sequence of pure passes over the event's detections so each rule can
//! be property-tested in isolation. After the passes the event's people
//! aggregates are recomputed; the stranger sentinel must survive when
//! unresolved strangers remain.

use std::collections::HashMap;

use tracing::info;

use crate::domain::entities::{Event, ResolutionMethod, ResolvedRole};

/// Refiner thresholds.
#[derive(Debug, Clone)]
pub struct RefinerConfig {
    /// Appearances within one event required to promote a suspect or to
    /// re-mark recurring strangers.
    pub promotion_count: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self { promotion_count: 3 }
    }
}

/// Event-level identity consistency refiner.
pub struct IdentityRefiner {
    config: RefinerConfig,
}

impl IdentityRefiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    /// Applies the three refinement rules in order, then re-aggregates the
    /// event's people info.
    pub fn refine(&self, event: &mut Event) {
        self.promote_repeated_suspects(event);
        self.mark_recurring_strangers(event);
        self.promote_by_context(event);

        event.reaggregate_people();
    }

    /// Rule 1: a person resolved as suspected family at least
    /// `promotion_count` times across the event is promoted to family.
    fn promote_repeated_suspects(&self, event: &mut Event) {
        let mut suspect_counts: HashMap<i64, usize> = HashMap::new();

        for detection in event.detections() {
            if detection.role() == ResolvedRole::SuspectedFamily {
                if let Some(person_id) = detection.person_id() {
                    *suspect_counts.entry(person_id).or_insert(0) += 1;
                }
            }
        }

        let promoted: Vec<i64> = suspect_counts
            .iter()
            .filter(|(_, &count)| count >= self.config.promotion_count)
            .map(|(&id, _)| id)
            .collect();

        if promoted.is_empty() {
            return;
        }

        for clip in &mut event.clips {
            for frame in &mut clip.frames {
                for detection in frame {
                    if detection.identity.role == ResolvedRole::SuspectedFamily
                        && detection
                            .identity
                            .person_id
                            .map(|id| promoted.contains(&id))
                            .unwrap_or(false)
                    {
                        detection.identity.role = ResolvedRole::Family;
                        detection.identity.method = ResolutionMethod::RefinedFromSuspected;
                    }
                }
            }
        }

        for person_id in promoted {
            info!(
                person_id,
                count = suspect_counts[&person_id],
                "Promoted suspected family to family"
            );
        }
    }

    /// Rule 2: when the event contains confirmed family and the stranger
    /// bucket has accumulated enough appearances, strangers are re-marked as
    /// suspected family.
    fn mark_recurring_strangers(&self, event: &mut Event) {
        let has_family = event
            .detections()
            .any(|d| d.role() == ResolvedRole::Family);
        let stranger_appearances = event
            .detections()
            .filter(|d| d.person_id().is_none() && d.role() == ResolvedRole::Stranger)
            .count();

        if !has_family || stranger_appearances < self.config.promotion_count {
            return;
        }

        info!(
            appearances = stranger_appearances,
            "Re-marking recurring strangers as suspected family"
        );

        for clip in &mut event.clips {
            for frame in &mut clip.frames {
                for detection in frame {
                    if detection.identity.person_id.is_none()
                        && detection.identity.role == ResolvedRole::Stranger
                    {
                        detection.identity.role = ResolvedRole::SuspectedFamily;
                        detection.identity.method = ResolutionMethod::RefinedFromStranger;
                    }
                }
            }
        }
    }

    /// Rule 3: a suspected/stranger detection sharing a frame list with a
    /// confirmed family detection is promoted to family. Detections without
    /// a person id have no identity to promote and are left alone.
    fn promote_by_context(&self, event: &mut Event) {
        for clip in &mut event.clips {
            for frame in &mut clip.frames {
                let frame_has_family = frame
                    .iter()
                    .any(|d| d.identity.role == ResolvedRole::Family);
                if !frame_has_family {
                    continue;
                }

                for detection in frame {
                    let promotable = matches!(
                        detection.identity.role,
                        ResolvedRole::SuspectedFamily | ResolvedRole::Stranger
                    );
                    if promotable && detection.identity.person_id.is_some() {
                        info!(
                            person_id = ?detection.identity.person_id,
                            "Promoted to family by co-occurrence with family"
                        );
                        detection.identity.role = ResolvedRole::Family;
                        detection.identity.method = ResolutionMethod::RefinedFromContext;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        ClipResult, Detection, ResolvedIdentity,
    };
    use crate::domain::value_objects::BoundingBox;
    use chrono::{TimeZone, Utc};

    fn detection(
        person_id: Option<i64>,
        role: ResolvedRole,
        method: ResolutionMethod,
    ) -> Detection {
        Detection {
            frame_index: 0,
            bbox: BoundingBox::new(0, 0, 100, 200),
            confidence: 0.8,
            face_embedding: None,
            body_embedding: None,
            track_id: None,
            identity: ResolvedIdentity {
                person_id,
                role,
                method,
                confidence: 0.6,
            },
        }
    }

    fn event_of(frames: Vec<Vec<Detection>>) -> Event {
        let clip = ClipResult {
            start_time: Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap(),
            camera: "doorbell".to_string(),
            video_path: "videos/clip.mp4".into(),
            video_duration_secs: 10.0,
            frames,
        };
        Event::pack(vec![clip]).unwrap()
    }

    fn suspect(person_id: i64) -> Detection {
        detection(
            Some(person_id),
            ResolvedRole::SuspectedFamily,
            ResolutionMethod::SoftBody,
        )
    }

    fn family(person_id: i64) -> Detection {
        detection(Some(person_id), ResolvedRole::Family, ResolutionMethod::Face)
    }

    fn stranger() -> Detection {
        detection(None, ResolvedRole::Stranger, ResolutionMethod::New)
    }

    fn refiner() -> IdentityRefiner {
        IdentityRefiner::new(RefinerConfig::default())
    }

    #[test]
    fn repeated_suspect_is_promoted() {
        let mut event = event_of(vec![vec![suspect(5)], vec![suspect(5)], vec![suspect(5)]]);
        refiner().refine(&mut event);

        for d in event.detections() {
            assert_eq!(d.role(), ResolvedRole::Family);
            assert_eq!(d.method(), ResolutionMethod::RefinedFromSuspected);
        }
        assert_eq!(event.people_info[&5].role, ResolvedRole::Family);
    }

    #[test]
    fn two_appearances_are_not_enough() {
        let mut event = event_of(vec![vec![suspect(5)], vec![suspect(5)]]);
        refiner().refine(&mut event);

        for d in event.detections() {
            assert_eq!(d.role(), ResolvedRole::SuspectedFamily);
        }
    }

    #[test]
    fn recurring_strangers_become_suspected_with_family_present() {
        let mut event = event_of(vec![
            vec![family(1)],
            vec![stranger()],
            vec![stranger()],
            vec![stranger()],
        ]);
        refiner().refine(&mut event);

        let stranger_roles: Vec<_> = event
            .detections()
            .filter(|d| d.person_id().is_none())
            .map(|d| (d.role(), d.method()))
            .collect();
        assert_eq!(stranger_roles.len(), 3);
        for (role, method) in stranger_roles {
            assert_eq!(role, ResolvedRole::SuspectedFamily);
            assert_eq!(method, ResolutionMethod::RefinedFromStranger);
        }
    }

    #[test]
    fn strangers_stay_strangers_without_family() {
        let mut event = event_of(vec![vec![stranger()], vec![stranger()], vec![stranger()]]);
        refiner().refine(&mut event);

        for d in event.detections() {
            assert_eq!(d.role(), ResolvedRole::Stranger);
        }
        // The stranger sentinel survives re-aggregation.
        assert!(event.has_strangers);
        assert!(!event.is_empty_of_people());
    }

    #[test]
    fn suspect_sharing_a_frame_with_family_is_promoted() {
        let mut event = event_of(vec![vec![family(1), suspect(7)]]);
        refiner().refine(&mut event);

        let promoted = event
            .detections()
            .find(|d| d.person_id() == Some(7))
            .unwrap();
        assert_eq!(promoted.role(), ResolvedRole::Family);
        assert_eq!(promoted.method(), ResolutionMethod::RefinedFromContext);
    }

    #[test]
    fn idless_stranger_is_not_promoted_by_context() {
        let mut event = event_of(vec![vec![family(1), stranger()]]);
        refiner().refine(&mut event);

        let still_stranger = event
            .detections()
            .find(|d| d.person_id().is_none())
            .unwrap();
        assert_eq!(still_stranger.role(), ResolvedRole::Stranger);
    }

    #[test]
    fn reaggregation_reflects_promotions() {
        let mut event = event_of(vec![vec![suspect(5)], vec![suspect(5)], vec![suspect(5)]]);
        assert_eq!(event.people_info[&5].role, ResolvedRole::SuspectedFamily);

        refiner().refine(&mut event);

        assert_eq!(event.people_info[&5].role, ResolvedRole::Family);
        assert!(!event.has_strangers);
    }
}
