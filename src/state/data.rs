/// Shared data structures for the catalog
///
/// These structs represent the data model that flows between
/// the database layer, the reconcilers and the HTTP layer.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extensions cataloged as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Extensions cataloged as videos (compared lowercase)
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "webm", "mkv"];

/// Media classification derived purely from the file extension
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    /// Never stored in the catalog
    Other,
}

impl MediaType {
    /// Classify a path by its extension, case-insensitively
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension() else {
            return MediaType::Other;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Video
        } else {
            MediaType::Other
        }
    }

    /// Whether files of this type get an Asset record
    pub fn is_indexed(self) -> bool {
        !matches!(self, MediaType::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            _ => MediaType::Other,
        }
    }
}

/// One top-level directory under the root
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Directory base name (natural key)
    pub id: String,
    /// Display name, kept equal to `id`
    pub name: String,
    /// Absolute path of the directory
    pub full_path: String,
    /// Cached number of assets owned by this project
    pub asset_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// One indexed image or video file
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// File base name, unique within its project
    pub id: String,
    /// Same as `id`, retained for display
    pub filename: String,
    /// Owning project's id (by value, not enforced)
    pub project_id: String,
    /// Absolute path of the file
    pub full_path: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// Byte length at last stat
    pub size: u64,
    /// Filesystem modification time at last stat
    pub mtime: DateTime<Utc>,
    /// When this catalog row was created (not the file)
    pub created_at: DateTime<Utc>,
}

/// One page of a project's assets, newest modification first
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetPage {
    pub items: Vec<Asset>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Outcome of a full scan
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Projects present on disk after the scan
    pub projects: usize,
    /// Assets written across all projects
    pub assets: usize,
    /// Projects removed because their directory is gone
    pub pruned: usize,
}

/// Convert a stored millisecond timestamp back to UTC
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
