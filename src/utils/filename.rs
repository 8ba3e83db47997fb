use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::utils::constants::HOUR_LABEL_FORMAT;

/// Label of a map hour, e.g. `2024-05-01_1400`.
pub fn hour_label(hour: DateTime<Utc>) -> String {
    hour.format(HOUR_LABEL_FORMAT).to_string()
}

/// Artifact filename with format: {YYYY-MM-DD_HHMM}_{vmin}_{vmax}.png
///
/// The colour-scale bounds are part of the name so renders of the same hour
/// with different scales never overwrite each other.
pub fn map_filename(label: &str, vmin: i32, vmax: i32) -> String {
    format!("{}_{}_{}.png", label, vmin, vmax)
}

pub fn map_path(dir: &Path, label: &str, vmin: i32, vmax: i32) -> PathBuf {
    dir.join(map_filename(label, vmin, vmax))
}
