//! Input Dataset Loader
//!
//! Reads the clip manifest: a JSON list of {video_path, camera, time}
//! records resolved against the configured video base directory. Records
//! missing fields or pointing at missing files are skipped with a warning.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::entities::ClipRecord;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct RawRecord {
    video_path: Option<String>,
    camera: Option<String>,
    time: Option<String>,
}

/// Loads and validates the clip manifest.
pub fn load_dataset(manifest_path: &Path, video_base_dir: &Path) -> Result<Vec<ClipRecord>> {
    let content = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("cannot read dataset {}", manifest_path.display()))?;

    let raw_records: Vec<RawRecord> = serde_json::from_str(&content)
        .with_context(|| format!("dataset {} is not a JSON record list", manifest_path.display()))?;

    let total = raw_records.len();
    let mut records = Vec::with_capacity(total);

    for (index, raw) in raw_records.into_iter().enumerate() {
        let (Some(video_path), Some(camera), Some(time)) = (raw.video_path, raw.camera, raw.time)
        else {
            warn!(index, "Skipping record with missing fields");
            continue;
        };

        let start_time = match NaiveDateTime::parse_from_str(&time, TIME_FORMAT) {
            Ok(naive) => Utc.from_utc_datetime(&naive),
            Err(e) => {
                warn!(index, time = %time, error = %e, "Skipping record with unparseable time");
                continue;
            }
        };

        let resolved = video_base_dir.join(&video_path);
        if !resolved.exists() {
            warn!(index, video = %resolved.display(), "Skipping record with unresolved video path");
            continue;
        }

        records.push(ClipRecord::new(resolved, camera, start_time));
    }

    info!(
        loaded = records.len(),
        skipped = total - records.len(),
        "Dataset loaded"
    );

    Ok(records)
}
