//! Asset access facade used by the HTTP layer.
//!
//! Reads come straight from the catalog. The two rename operations are the
//! only places that write to disk; they update the catalog directly
//! afterwards instead of waiting for the watcher.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};
use crate::state::catalog::Catalog;
use crate::state::data::{Asset, AssetPage, MediaType, Project};

/// Characters never allowed in a new asset or project name
pub const FORBIDDEN_NAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

pub fn list_projects(catalog: &Catalog) -> Result<Vec<Project>> {
    catalog.library().list_projects()
}

/// One page of a project's assets, most recently modified first.
///
/// Pages are 1-based; page 0 is treated as page 1 and the page size is
/// clamped to `1..=MAX_PAGE_SIZE`.
pub fn list_assets(
    catalog: &Catalog,
    project_id: &str,
    page: Option<u32>,
    page_size: Option<u32>,
) -> Result<AssetPage> {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = u64::from(page - 1) * u64::from(page_size);

    let library = catalog.library();
    let total = library.count_assets(project_id)?;
    let items = library.list_assets(project_id, page_size, offset)?;

    Ok(AssetPage {
        items,
        total,
        page,
        page_size,
    })
}

/// Rename an asset's file on disk and point its catalog row at the new name.
///
/// If `new_name` has no extension the current one is kept. All checks run
/// before anything is touched.
pub fn rename_asset(
    catalog: &Catalog,
    project_id: &str,
    asset_id: &str,
    new_name: &str,
) -> Result<Asset> {
    let name = validate_name(new_name)?;

    let _reconcile = catalog.reconcile_lock();
    let library = catalog.library();
    let asset = library
        .get_asset(project_id, asset_id)?
        .ok_or_else(|| CatalogError::NotFound(format!("asset {project_id}/{asset_id}")))?;

    let old_path = PathBuf::from(&asset.full_path);
    let name = keep_extension(name, &old_path);
    let media_type = MediaType::from_path(Path::new(&name));
    if !media_type.is_indexed() {
        return Err(CatalogError::InvalidName(format!(
            "{name} is not an image or video file name"
        )));
    }
    if name == asset.id {
        return Ok(asset);
    }

    let new_path = old_path.with_file_name(&name);
    if new_path.exists() || library.get_asset(project_id, &name)?.is_some() {
        return Err(CatalogError::AlreadyExists(new_path));
    }

    fs::rename(&old_path, &new_path)?;
    library.rename_asset_row(project_id, asset_id, &name, &new_path, media_type)?;
    info!(project = project_id, from = asset_id, to = %name, "asset renamed");

    library
        .get_asset(project_id, &name)?
        .ok_or_else(|| CatalogError::NotFound(format!("asset {project_id}/{name}")))
}

/// Rename a project directory and rewrite every asset path beneath it.
///
/// The directory move and the catalog rewrite are separate steps with no
/// rollback. If the rewrite fails part way, the error is returned and the
/// stale rows stay until the next full scan replaces them.
pub fn rename_project(catalog: &Catalog, project_id: &str, new_name: &str) -> Result<Project> {
    let name = validate_name(new_name)?;

    let _reconcile = catalog.reconcile_lock();
    let library = catalog.library();
    let project = library
        .get_project(project_id)?
        .ok_or_else(|| CatalogError::NotFound(format!("project {project_id}")))?;
    if name == project.id {
        return Ok(project);
    }

    let old_dir = PathBuf::from(&project.full_path);
    let new_dir = old_dir.with_file_name(&name);
    if new_dir.exists() || library.get_project(&name)?.is_some() {
        return Err(CatalogError::AlreadyExists(new_dir));
    }

    fs::rename(&old_dir, &new_dir)?;
    if let Err(e) = library.rename_project_rows(project_id, &name, &new_dir, Utc::now()) {
        warn!(
            project = project_id,
            error = %e,
            "directory moved but catalog rewrite failed; next scan will repair it"
        );
        return Err(e);
    }
    info!(from = project_id, to = %name, "project renamed");

    library
        .get_project(&name)?
        .ok_or_else(|| CatalogError::NotFound(format!("project {name}")))
}

/// Trimmed name, or a validation error.
fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CatalogError::InvalidName("name is empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(CatalogError::InvalidName(format!("{name} is reserved")));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(CatalogError::InvalidName(format!(
            "name contains forbidden character {c:?}"
        )));
    }
    Ok(name.to_string())
}

fn keep_extension(name: String, original: &Path) -> String {
    if Path::new(&name).extension().is_some() {
        return name;
    }
    match original.extension() {
        Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
        None => name,
    }
}

// ========== Byte access ==========

/// An asset's file, resolved for streaming
#[derive(Debug, Clone, PartialEq)]
pub struct AssetFile {
    pub path: PathBuf,
    /// Current size on disk, which may differ from the cataloged one
    pub size: u64,
    pub media_type: MediaType,
    pub content_type: &'static str,
}

/// Look up an asset and stat its file.
pub fn open_asset(catalog: &Catalog, project_id: &str, asset_id: &str) -> Result<AssetFile> {
    let asset = catalog
        .library()
        .get_asset(project_id, asset_id)?
        .ok_or_else(|| CatalogError::NotFound(format!("asset {project_id}/{asset_id}")))?;

    let path = PathBuf::from(&asset.full_path);
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CatalogError::NotFound(format!("file {}", path.display())),
        _ => CatalogError::Io(e),
    })?;

    Ok(AssetFile {
        content_type: content_type(&path),
        size: metadata.len(),
        media_type: asset.media_type,
        path,
    })
}

/// MIME type for a cataloged extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Inclusive byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// How to answer a request given its `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range: send the whole file
    Full,
    Partial(ByteRange),
    /// Well-formed but outside the file
    Unsatisfiable,
}

/// Resolve a single-range `bytes=` header against a file of `size` bytes.
///
/// Supports `a-b`, `a-` and `-n`. Headers that are missing, malformed or ask
/// for several ranges fall back to the whole file.
pub fn resolve_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeOutcome::Full;
    };
    if ranges.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: "-500" is the last 500 bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        size.saturating_sub(1)
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size.saturating_sub(1)),
            _ => return RangeOutcome::Full,
        }
    };

    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial(ByteRange { start, end })
}
