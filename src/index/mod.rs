//! Filesystem reconciliation.
//!
//! Two writers keep the catalog mirroring the root directory:
//! - `scanner`: full resync, run on demand
//! - `watcher`: incremental updates from filesystem notifications
//!
//! Both are best-effort. Neither writes back to disk, and any drift left by
//! an interrupted run or a missed event is healed by the next full scan.

pub mod events;
pub mod paths;
pub mod scanner;
pub mod watcher;

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;

use crate::state::data::{Asset, MediaType};

/// Stat `path` and build its asset record.
///
/// `Ok(None)` for anything that is not an indexed image or video file.
pub fn stat_asset(project_id: &str, path: &Path) -> io::Result<Option<Asset>> {
    let media_type = MediaType::from_path(path);
    if !media_type.is_indexed() {
        return Ok(None);
    }

    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Ok(None);
    }
    let Some(name) = paths::file_name(path) else {
        return Ok(None);
    };

    let now = Utc::now();
    let mtime = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(now);

    Ok(Some(Asset {
        id: name.clone(),
        filename: name,
        project_id: project_id.to_string(),
        full_path: path.to_string_lossy().into_owned(),
        media_type,
        size: metadata.len(),
        mtime,
        created_at: now,
    }))
}
