//! Full reconciliation of the catalog against the root directory.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::stat_asset;
use crate::error::Result;
use crate::state::catalog::Catalog;
use crate::state::data::{Asset, Project, ScanSummary};

/// Bring the catalog into exact correspondence with the configured root.
///
/// Holds the reconcile lock for the whole run, so watcher events queue
/// behind it. The walk itself runs without the store lock; each project is
/// written in one short locked section.
pub fn scan(catalog: &Catalog) -> Result<ScanSummary> {
    let _reconcile = catalog.reconcile_lock();
    let root = catalog.root();
    scan_root(catalog, &root)
}

fn scan_root(catalog: &Catalog, root: &Path) -> Result<ScanSummary> {
    info!(root = %root.display(), "scanning root");

    let on_disk = match list_project_dirs(root) {
        Ok(dirs) => dirs,
        Err(e) => {
            // A vanished root is a degraded condition, not a reason to wipe the catalog
            warn!(root = %root.display(), error = %e, "root is not readable, skipping scan");
            return Ok(ScanSummary::default());
        }
    };

    let mut summary = ScanSummary::default();

    let known = catalog.library().list_project_ids()?;
    for id in known.iter().filter(|id| !on_disk.contains_key(*id)) {
        catalog.library().delete_project(id)?;
        debug!(project = %id, "pruned project");
        summary.pruned += 1;
    }

    for (id, dir) in &on_disk {
        let assets = collect_assets(id, dir);

        let library = catalog.library();
        library.replace_project_assets(id, &assets)?;
        let asset_count = library.count_assets(id)?;
        library.upsert_project(&Project {
            id: id.clone(),
            name: id.clone(),
            full_path: dir.to_string_lossy().into_owned(),
            asset_count,
            updated_at: Utc::now(),
        })?;

        summary.projects += 1;
        summary.assets += asset_count as usize;
    }

    info!(
        projects = summary.projects,
        assets = summary.assets,
        pruned = summary.pruned,
        "scan complete"
    );
    Ok(summary)
}

/// Immediate subdirectories of the root, keyed by base name.
fn list_project_dirs(root: &Path) -> io::Result<BTreeMap<String, PathBuf>> {
    let mut dirs = BTreeMap::new();
    for entry in fs::read_dir(root)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        // is_dir() follows symlinks
        if path.is_dir() {
            dirs.insert(entry.file_name().to_string_lossy().into_owned(), path);
        }
    }
    Ok(dirs)
}

/// Every image and video under `dir`, at any depth.
///
/// Files that vanish or cannot be read mid-walk are skipped.
pub(super) fn collect_assets(project_id: &str, dir: &Path) -> Vec<Asset> {
    let mut assets = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        match stat_asset(project_id, entry.path()) {
            Ok(Some(asset)) => assets.push(asset),
            Ok(None) => {}
            Err(e) => debug!(path = %entry.path().display(), error = %e, "skipping unreadable file"),
        }
    }

    assets
}
