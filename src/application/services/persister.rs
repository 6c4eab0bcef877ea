//! Event Persister
//!
//! Builds the per-event write set: one event row, new person rows for
//! stranger buckets, behaviour-inferred role updates and one appearance per
//! person with that person's representative detection. The repository
//! executes the whole set in a single transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::application::error::AppResult;
use crate::domain::entities::{
    detection_score, stranger_key, Detection, Event, MatchMethod, PersonRole, ResolvedRole,
};
use crate::domain::repositories::{
    EventRepository, NewAppearance, NewStoredEvent, PersonRef, RoleUpdate, StrangerUpsert,
};

/// Description stored when an event has no usable summary.
const DEFAULT_DESCRIPTION: &str = "该事件已记录";

/// Maps a behavioural role onto the storage role enum.
fn map_role_to_storage(role: ResolvedRole) -> PersonRole {
    match role {
        ResolvedRole::Family => PersonRole::Owner,
        ResolvedRole::Visitor | ResolvedRole::Delivery | ResolvedRole::Service => {
            PersonRole::Visitor
        }
        ResolvedRole::SuspectedFamily | ResolvedRole::Stranger | ResolvedRole::Unknown => {
            PersonRole::Unknown
        }
    }
}

/// Persists fused events into the episodic store.
pub struct EventPersister {
    event_repo: Arc<dyn EventRepository>,
}

impl EventPersister {
    pub fn new(event_repo: Arc<dyn EventRepository>) -> Self {
        Self { event_repo }
    }

    /// Persists one event atomically. Returns the stored event id, or None
    /// when the event had nothing persistable.
    pub async fn persist(&self, event: &Event) -> AppResult<Option<Uuid>> {
        let stored_event = NewStoredEvent {
            id: Uuid::new_v4(),
            video_filename: event.first_video_filename(),
            start_time: event.start_time,
            camera_location: event.camera_location(),
            llm_description: event
                .summary_text
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        };

        let groups = group_detections(event);

        let mut strangers: Vec<StrangerUpsert> = Vec::new();
        let mut appearances: Vec<NewAppearance> = Vec::new();

        for (person_ref, detections) in &groups {
            let Some(representative) = select_representative(detections) else {
                continue;
            };

            let Some(body) = representative.body_embedding.clone() else {
                warn!(
                    person = ?person_ref,
                    "Representative detection has no body embedding, skipping group"
                );
                continue;
            };

            if let PersonRef::Stranger(bucket_key) = person_ref {
                let role = event
                    .stranger_inferred_role
                    .map(map_role_to_storage)
                    .unwrap_or(PersonRole::Unknown);

                strangers.push(StrangerUpsert {
                    bucket_key: bucket_key.clone(),
                    name: stranger_name(event, bucket_key),
                    role,
                    body_embedding: body.clone(),
                    at: event.start_time,
                });
            }

            appearances.push(NewAppearance {
                person: person_ref.clone(),
                match_method: MatchMethod::from(representative.method()),
                body_embedding: body,
            });
        }

        let role_updates: Vec<RoleUpdate> = event
            .inferred_roles
            .iter()
            .map(|(&person_id, &role)| RoleUpdate {
                person_id,
                role: map_role_to_storage(role),
                note: format!("[行为推断: {role:?}]"),
                at: event.start_time,
            })
            .collect();

        if appearances.is_empty() && event.people.is_empty() && !event.has_strangers {
            // Still record the empty event row so the day's timeline is
            // complete.
            let id = self
                .event_repo
                .save_event(&stored_event, &[], &[], &[])
                .await?;
            return Ok(Some(id));
        }

        let id = self
            .event_repo
            .save_event(&stored_event, &strangers, &role_updates, &appearances)
            .await?;

        info!(
            event_id = %id,
            appearances = appearances.len(),
            strangers = strangers.len(),
            role_updates = role_updates.len(),
            "Event persisted"
        );

        Ok(Some(id))
    }
}

/// Groups every detection by person id; id-less strangers bucket by the
/// stable body hash (or an incrementing index without one).
fn group_detections(event: &Event) -> BTreeMap<PersonRef, Vec<&Detection>> {
    let mut groups: BTreeMap<PersonRef, Vec<&Detection>> = BTreeMap::new();
    let mut stranger_index = 0usize;

    for clip in &event.clips {
        for detection in clip.detections() {
            let key = match detection.person_id() {
                Some(person_id) => PersonRef::Known(person_id),
                None => {
                    if !detection.role().is_stranger() {
                        continue;
                    }
                    let key = stranger_key(detection, stranger_index);
                    stranger_index += 1;
                    PersonRef::Stranger(key)
                }
            };
            groups.entry(key).or_default().push(detection);
        }
    }

    groups
}

/// Picks the representative detection by quality score, ties broken by the
/// earliest frame.
fn select_representative<'a>(detections: &[&'a Detection]) -> Option<&'a Detection> {
    detections
        .iter()
        .copied()
        .max_by(|a, b| {
            detection_score(a)
                .partial_cmp(&detection_score(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.frame_index.cmp(&a.frame_index))
        })
}

/// Stranger person name: event timestamp plus bucket key suffix.
fn stranger_name(event: &Event, bucket_key: &str) -> String {
    let timestamp = event.start_time.format("%Y%m%d_%H%M%S");
    let suffix: String = bucket_key
        .strip_prefix("hash_")
        .unwrap_or(bucket_key)
        .chars()
        .take(8)
        .collect();
    format!("Stranger_{timestamp}_{suffix}")
}
