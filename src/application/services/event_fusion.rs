//! Event Fusion
//!
//! Sorts scanned clips by wall-clock time and groups them into events with a
//! single-pass sliding buffer: a clip joins the current buffer only while the
//! fusion policy says it is connected to the buffer's last clip.

use tracing::{info, warn};

use crate::application::services::fusion_policy::FusionPolicy;
use crate::domain::entities::{ClipResult, Event};

/// Groups clip results into ordered events.
pub struct EventFusion {
    policy: FusionPolicy,
}

impl EventFusion {
    pub fn new(policy: FusionPolicy) -> Self {
        Self { policy }
    }

    /// Validates, sorts and fuses clips into events ordered by start time.
    pub fn fuse(&self, clips: Vec<ClipResult>) -> Vec<Event> {
        let sorted = sort_and_validate(clips);
        if sorted.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut buffer: Vec<ClipResult> = Vec::new();

        for clip in sorted {
            let connected = buffer
                .last()
                .map(|last| self.policy.connected(last, &clip))
                .unwrap_or(true);

            if connected {
                buffer.push(clip);
            } else {
                if let Some(event) = Event::pack(std::mem::take(&mut buffer)) {
                    events.push(event);
                }
                buffer.push(clip);
            }
        }

        if let Some(event) = Event::pack(buffer) {
            events.push(event);
        }

        info!(events = events.len(), "Event fusion complete");
        events
    }
}

/// Drops unusable clips and stable-sorts the rest ascending by start time.
fn sort_and_validate(clips: Vec<ClipResult>) -> Vec<ClipResult> {
    let total = clips.len();

    let mut valid: Vec<ClipResult> = clips
        .into_iter()
        .filter(|clip| {
            let ok = !clip.camera.is_empty() && !clip.video_path.as_os_str().is_empty();
            if !ok {
                warn!(time = %clip.start_time, "Dropping clip with missing fields");
            }
            ok
        })
        .collect();

    if valid.len() < total {
        warn!(dropped = total - valid.len(), "Removed invalid clips");
    }

    valid.sort_by_key(|clip| clip.start_time);

    if let (Some(first), Some(last)) = (valid.first(), valid.last()) {
        info!(
            clips = valid.len(),
            from = %first.start_time,
            to = %last.start_time,
            "Sorted clip stream"
        );
    }

    valid
}
