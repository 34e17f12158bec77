//! Incremental reconciliation driven by filesystem notifications.

use chrono::Utc;
use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{self, WatchEvent};
use super::paths::{self, RootRelative};
use super::scanner;
use super::stat_asset;
use crate::error::Result;
use crate::state::catalog::Catalog;
use crate::state::library::Library;

/// Events more than this many segments below the root are not applied.
pub const MAX_WATCH_DEPTH: usize = 8;

/// The process-wide watcher service.
///
/// Constructed once and held for the process lifetime. It moves one way,
/// from idle to running, on the first successful `ensure_started`; there is
/// no stop. The OS watch handle lives as long as this object.
pub struct CatalogWatcher {
    catalog: Arc<Catalog>,
    started: AtomicBool,
    active: Mutex<Option<ActiveWatch>>,
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl CatalogWatcher {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            started: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start watching the configured root, once.
    ///
    /// Returns true if this call started the watcher. Later calls are no-ops,
    /// except that a root changed since the watch began is re-pointed.
    pub fn ensure_started(&self) -> Result<bool> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.follow_root()?;
            return Ok(false);
        }

        match self.start() {
            Ok(()) => Ok(true),
            Err(e) => {
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<()> {
        let mut active = self.active.lock();
        let root = self.catalog.root();

        let catalog = Arc::clone(&self.catalog);
        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for change in events::from_notify(&event) {
                    apply_event(&catalog, &change);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        info!(root = %root.display(), "watching root");
        *active = Some(ActiveWatch { watcher, root });
        Ok(())
    }

    /// Re-point the running watch if the configured root moved.
    fn follow_root(&self) -> Result<()> {
        let mut active = self.active.lock();
        let Some(current) = active.as_mut() else {
            return Ok(());
        };

        let root = self.catalog.root();
        if current.root == root {
            return Ok(());
        }

        if let Err(e) = current.watcher.unwatch(&current.root) {
            debug!(root = %current.root.display(), error = %e, "old root already unwatched");
        }
        current.watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(from = %current.root.display(), to = %root.display(), "watch moved to new root");
        current.root = root;
        Ok(())
    }
}

impl std::fmt::Debug for CatalogWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogWatcher")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Apply one change to the catalog.
///
/// The root is read at handling time, so events from a watch that outlived
/// a root change resolve outside the root and are dropped. Failures are
/// logged and absorbed: a missed event is corrected by the next one or by
/// the next full scan.
pub fn apply_event(catalog: &Catalog, event: &WatchEvent) {
    let _reconcile = catalog.reconcile_lock();
    let root = catalog.root();

    let Some(rel) = paths::relativize(&root, event.path()) else {
        debug!(path = %event.path().display(), "event outside root, dropped");
        return;
    };
    if rel.depth > MAX_WATCH_DEPTH {
        return;
    }

    let project_dir = root.join(&rel.project_id);
    let library = catalog.library();
    let outcome = match event {
        WatchEvent::Add(path) | WatchEvent::Change(path) => {
            on_file_written(&library, &rel, &project_dir, path)
        }
        WatchEvent::Unlink(path) => on_file_removed(&library, &rel, path),
        WatchEvent::AddDir(path) => on_dir_added(&library, &rel, &project_dir, path),
        WatchEvent::UnlinkDir(path) => on_dir_removed(&library, &rel, path),
    };

    match outcome {
        Ok(()) => debug!(?event, project = %rel.project_id, "applied watch event"),
        Err(e) => warn!(?event, error = %e, "failed to apply watch event"),
    }
}

fn on_file_written(
    library: &Library,
    rel: &RootRelative,
    project_dir: &Path,
    path: &Path,
) -> Result<()> {
    // Files sitting directly in the root belong to no project
    if rel.depth < 2 {
        return Ok(());
    }

    let asset = match stat_asset(&rel.project_id, path) {
        Ok(Some(asset)) => asset,
        Ok(None) => return Ok(()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "stat failed, event skipped");
            return Ok(());
        }
    };

    let now = Utc::now();
    library.touch_project(&rel.project_id, &project_dir.to_string_lossy(), now)?;
    library.upsert_asset(&asset)?;
    library.refresh_asset_count(&rel.project_id, now)?;
    Ok(())
}

fn on_file_removed(library: &Library, rel: &RootRelative, path: &Path) -> Result<()> {
    // Root-level entries are never assets; a dotted project directory that
    // vanished without a typed event lands here
    if rel.depth < 2 {
        return on_dir_removed(library, rel, path);
    }
    let Some(name) = paths::file_name(path) else {
        return Ok(());
    };

    library.delete_asset(&rel.project_id, &name)?;
    library.refresh_asset_count(&rel.project_id, Utc::now())?;
    Ok(())
}

fn on_dir_added(
    library: &Library,
    rel: &RootRelative,
    project_dir: &Path,
    path: &Path,
) -> Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Ok(()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "stat failed, event skipped");
            return Ok(());
        }
    }

    let now = Utc::now();
    library.touch_project(&rel.project_id, &project_dir.to_string_lossy(), now)?;

    // Files created before the backend watched the new directory, or moved
    // in along with it, raise no events of their own
    let assets = scanner::collect_assets(&rel.project_id, path);
    for asset in &assets {
        library.upsert_asset(asset)?;
    }
    if !assets.is_empty() {
        debug!(path = %path.display(), count = assets.len(), "cataloged files in new directory");
    }
    library.refresh_asset_count(&rel.project_id, now)
}

fn on_dir_removed(library: &Library, rel: &RootRelative, path: &Path) -> Result<()> {
    if rel.depth == 1 {
        library.delete_project(&rel.project_id)?;
        return Ok(());
    }

    // Nested directory: only the removed subtree goes, the project stays
    let removed = library.delete_assets_under(&rel.project_id, path)?;
    if removed > 0 {
        library.refresh_asset_count(&rel.project_id, Utc::now())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::MediaType;
    use std::time::{Duration, Instant};

    fn setup() -> (tempfile::TempDir, Arc<Catalog>, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(
            Library::open_in_memory().unwrap(),
            dir.path().to_path_buf(),
        ));
        let root = catalog.set_root(dir.path()).unwrap();
        (dir, catalog, root)
    }

    #[test]
    fn test_add_creates_project_and_asset() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("projB")).unwrap();
        fs::write(root.join("projB/clip.mp4"), [1u8; 5]).unwrap();

        apply_event(&catalog, &WatchEvent::Add(root.join("projB/clip.mp4")));

        let library = catalog.library();
        let project = library.get_project("projB").unwrap().unwrap();
        assert_eq!(project.asset_count, 1);
        assert_eq!(Path::new(&project.full_path), root.join("projB"));
        let asset = library.get_asset("projB", "clip.mp4").unwrap().unwrap();
        assert_eq!(asset.media_type, MediaType::Video);
        assert_eq!(asset.size, 5);
    }

    #[test]
    fn test_change_without_prior_record_upserts_once() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("p")).unwrap();
        let file = root.join("p/shot.png");
        fs::write(&file, b"1").unwrap();

        apply_event(&catalog, &WatchEvent::Change(file.clone()));
        fs::write(&file, b"1234").unwrap();
        apply_event(&catalog, &WatchEvent::Change(file.clone()));

        let library = catalog.library();
        assert_eq!(library.count_assets("p").unwrap(), 1);
        assert_eq!(library.get_asset("p", "shot.png").unwrap().unwrap().size, 4);
    }

    #[test]
    fn test_unlink_removes_asset_and_recounts() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("p")).unwrap();
        fs::write(root.join("p/a.png"), b"a").unwrap();
        fs::write(root.join("p/b.png"), b"b").unwrap();
        scanner::scan(&catalog).unwrap();

        fs::remove_file(root.join("p/a.png")).unwrap();
        apply_event(&catalog, &WatchEvent::Unlink(root.join("p/a.png")));

        let library = catalog.library();
        assert!(library.get_asset("p", "a.png").unwrap().is_none());
        assert_eq!(library.get_project("p").unwrap().unwrap().asset_count, 1);
    }

    #[test]
    fn test_unlink_dir_cascades() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("p")).unwrap();
        fs::write(root.join("p/a.png"), b"a").unwrap();
        fs::write(root.join("p/b.mov"), b"b").unwrap();
        scanner::scan(&catalog).unwrap();

        fs::remove_dir_all(root.join("p")).unwrap();
        apply_event(&catalog, &WatchEvent::UnlinkDir(root.join("p")));

        let library = catalog.library();
        assert!(library.get_project("p").unwrap().is_none());
        assert_eq!(library.count_assets("p").unwrap(), 0);
    }

    #[test]
    fn test_nested_unlink_dir_keeps_project() {
        let (_dir, catalog, root) = setup();
        fs::create_dir_all(root.join("p/renders")).unwrap();
        fs::write(root.join("p/renders/r.png"), b"r").unwrap();
        fs::write(root.join("p/keep.png"), b"k").unwrap();
        scanner::scan(&catalog).unwrap();

        fs::remove_dir_all(root.join("p/renders")).unwrap();
        apply_event(&catalog, &WatchEvent::UnlinkDir(root.join("p/renders")));

        let library = catalog.library();
        let project = library.get_project("p").unwrap().unwrap();
        assert_eq!(project.asset_count, 1);
        assert!(library.get_asset("p", "keep.png").unwrap().is_some());
        assert!(library.get_asset("p", "r.png").unwrap().is_none());
    }

    #[test]
    fn test_untyped_removal_of_dotted_project_dir() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("cut.v2")).unwrap();
        fs::write(root.join("cut.v2/a.png"), b"a").unwrap();
        scanner::scan(&catalog).unwrap();

        fs::remove_dir_all(root.join("cut.v2")).unwrap();
        // Extension-based guess calls this a file
        apply_event(&catalog, &WatchEvent::Unlink(root.join("cut.v2")));

        let library = catalog.library();
        assert!(library.get_project("cut.v2").unwrap().is_none());
        assert_eq!(library.count_assets("cut.v2").unwrap(), 0);
    }

    #[test]
    fn test_add_dir_creates_empty_project() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("fresh")).unwrap();

        apply_event(&catalog, &WatchEvent::AddDir(root.join("fresh")));

        let project = catalog.library().get_project("fresh").unwrap().unwrap();
        assert_eq!(project.asset_count, 0);
        assert_eq!(project.name, "fresh");
    }

    #[test]
    fn test_ignored_events() {
        let (_dir, catalog, root) = setup();
        let outside = tempfile::tempdir().unwrap();
        fs::create_dir(outside.path().join("p")).unwrap();
        fs::write(outside.path().join("p/x.png"), b"x").unwrap();
        fs::create_dir(root.join("p")).unwrap();
        fs::write(root.join("p/notes.txt"), b"t").unwrap();
        fs::write(root.join("loose.png"), b"l").unwrap();

        apply_event(&catalog, &WatchEvent::Add(outside.path().join("p/x.png")));
        apply_event(&catalog, &WatchEvent::Add(root.join("p/notes.txt")));
        apply_event(&catalog, &WatchEvent::Add(root.join("loose.png")));
        // Vanished before it could be stat'ed
        apply_event(&catalog, &WatchEvent::Add(root.join("p/ghost.png")));

        let library = catalog.library();
        assert!(library.list_projects().unwrap().is_empty());
        assert_eq!(library.count_assets("p").unwrap(), 0);
    }

    #[test]
    fn test_events_beyond_depth_limit_are_dropped() {
        let (_dir, catalog, root) = setup();
        let mut deep = root.join("p");
        for i in 0..MAX_WATCH_DEPTH {
            deep = deep.join(format!("d{i}"));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("far.png"), b"f").unwrap();

        apply_event(&catalog, &WatchEvent::Add(deep.join("far.png")));

        assert_eq!(catalog.library().count_assets("p").unwrap(), 0);
    }

    #[test]
    fn test_event_at_depth_limit_is_applied() {
        let (_dir, catalog, root) = setup();
        // project dir and file name count toward the depth
        let mut deep = root.join("p");
        for i in 0..MAX_WATCH_DEPTH - 2 {
            deep = deep.join(format!("d{i}"));
        }
        fs::create_dir_all(&deep).unwrap();
        let file = deep.join("edge.png");
        fs::write(&file, b"e").unwrap();
        assert_eq!(paths::relativize(&root, &file).unwrap().depth, MAX_WATCH_DEPTH);

        apply_event(&catalog, &WatchEvent::Add(file));

        assert!(catalog.library().get_asset("p", "edge.png").unwrap().is_some());
    }

    #[test]
    fn test_add_dir_catalogs_files_already_inside() {
        let (_dir, catalog, root) = setup();
        fs::create_dir_all(root.join("projM/sub")).unwrap();
        fs::write(root.join("projM/a.png"), b"a").unwrap();
        fs::write(root.join("projM/sub/b.mov"), b"bb").unwrap();
        fs::write(root.join("projM/readme.txt"), b"r").unwrap();

        apply_event(&catalog, &WatchEvent::AddDir(root.join("projM")));

        let library = catalog.library();
        assert_eq!(library.get_project("projM").unwrap().unwrap().asset_count, 2);
        assert!(library.get_asset("projM", "a.png").unwrap().is_some());
        assert_eq!(library.get_asset("projM", "b.mov").unwrap().unwrap().size, 2);
    }

    #[test]
    fn test_nested_add_dir_adds_to_existing_project() {
        let (_dir, catalog, root) = setup();
        fs::create_dir(root.join("p")).unwrap();
        fs::write(root.join("p/keep.png"), b"k").unwrap();
        scanner::scan(&catalog).unwrap();

        fs::create_dir(root.join("p/renders")).unwrap();
        fs::write(root.join("p/renders/r1.png"), b"1").unwrap();
        apply_event(&catalog, &WatchEvent::AddDir(root.join("p/renders")));

        let library = catalog.library();
        assert_eq!(library.get_project("p").unwrap().unwrap().asset_count, 2);
        assert!(library.get_asset("p", "r1.png").unwrap().is_some());
    }

    #[test]
    fn test_ensure_started_is_idempotent() {
        let (_dir, catalog, _root) = setup();
        let watcher = CatalogWatcher::new(catalog);

        assert!(!watcher.is_running());
        assert!(watcher.ensure_started().unwrap());
        assert!(watcher.is_running());
        assert!(!watcher.ensure_started().unwrap());
        assert!(watcher.is_running());
    }

    #[test]
    fn test_start_failure_leaves_watcher_idle() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(
            Library::open_in_memory().unwrap(),
            dir.path().join("does-not-exist"),
        ));
        let watcher = CatalogWatcher::new(catalog);

        assert!(watcher.ensure_started().is_err());
        assert!(!watcher.is_running());
    }

    /// Poll until `check` holds, failing after ten seconds.
    fn wait_for(check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !check() {
            assert!(Instant::now() < deadline, "catalog never caught up");
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_live_watch_picks_up_new_project() {
        let (_dir, catalog, root) = setup();
        let watcher = CatalogWatcher::new(Arc::clone(&catalog));
        watcher.ensure_started().unwrap();

        fs::create_dir(root.join("projB")).unwrap();
        fs::write(root.join("projB/clip.mp4"), b"video").unwrap();

        wait_for(|| {
            catalog
                .library()
                .get_asset("projB", "clip.mp4")
                .unwrap()
                .is_some_and(|a| a.size == 5)
        });

        let library = catalog.library();
        let project = library.get_project("projB").unwrap().unwrap();
        assert_eq!(project.asset_count, 1);
        assert_eq!(
            library.get_asset("projB", "clip.mp4").unwrap().unwrap().media_type,
            MediaType::Video
        );
    }

    #[test]
    fn test_live_watch_picks_up_directory_moved_in() {
        let (_dir, catalog, root) = setup();
        let staging = tempfile::tempdir().unwrap();
        fs::create_dir(staging.path().join("projM")).unwrap();
        fs::write(staging.path().join("projM/a.png"), b"abc").unwrap();

        let watcher = CatalogWatcher::new(Arc::clone(&catalog));
        watcher.ensure_started().unwrap();
        fs::rename(staging.path().join("projM"), root.join("projM")).unwrap();

        wait_for(|| catalog.library().get_asset("projM", "a.png").unwrap().is_some());
        let project = catalog.library().get_project("projM").unwrap().unwrap();
        assert_eq!(project.asset_count, 1);
    }

    #[test]
    fn test_live_watch_follows_root_change() {
        let (_dir, catalog, old_root) = setup();
        let watcher = CatalogWatcher::new(Arc::clone(&catalog));
        assert!(watcher.ensure_started().unwrap());

        let other = tempfile::tempdir().unwrap();
        let new_root = catalog.set_root(other.path()).unwrap();
        assert!(!watcher.ensure_started().unwrap());
        assert!(watcher.is_running());

        fs::create_dir(old_root.join("stale")).unwrap();
        fs::write(old_root.join("stale/old.png"), b"o").unwrap();
        fs::create_dir(new_root.join("fresh")).unwrap();
        fs::write(new_root.join("fresh/new.png"), b"n").unwrap();

        wait_for(|| catalog.library().get_asset("fresh", "new.png").unwrap().is_some());
        // Give any stray event from the old root time to land
        std::thread::sleep(Duration::from_millis(300));
        let library = catalog.library();
        assert!(library.get_project("stale").unwrap().is_none());
        assert_eq!(library.count_assets("stale").unwrap(), 0);
    }
}
