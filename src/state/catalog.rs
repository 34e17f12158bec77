use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::path::{Path, PathBuf};

use super::library::Library;
use super::path_config;
use crate::error::Result;

/// Process-wide catalog handle.
///
/// The library lock guards the SQLite connection and is held only for the
/// duration of a single query or short batch. The reconcile lock serializes
/// writers that mirror the filesystem: a full scan holds it end to end and
/// each watcher event holds it while applying one change, so the two never
/// interleave half-written state.
pub struct Catalog {
    library: Mutex<Library>,
    reconcile: Mutex<()>,
    default_root: PathBuf,
}

impl Catalog {
    pub fn new(library: Library, default_root: PathBuf) -> Self {
        Self {
            library: Mutex::new(library),
            reconcile: Mutex::new(()),
            default_root: absolute_root(default_root),
        }
    }

    /// Lock the store. Not re-entrant: never call `root()` while holding it.
    pub fn library(&self) -> MutexGuard<'_, Library> {
        self.library.lock()
    }

    pub fn reconcile_lock(&self) -> MutexGuard<'_, ()> {
        self.reconcile.lock()
    }

    /// Configured root, falling back to the built-in default.
    pub fn root(&self) -> PathBuf {
        path_config::get_root(&self.library(), &self.default_root)
    }

    pub fn set_root(&self, candidate: &Path) -> Result<PathBuf> {
        path_config::set_root(&self.library(), candidate)
    }
}

/// Anchor a relative default root at the working directory, and resolve it
/// fully when it already exists. Watch events carry absolute paths, so a
/// relative root would match none of them.
fn absolute_root(root: PathBuf) -> PathBuf {
    let absolute = if root.is_absolute() {
        root
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(root),
            Err(_) => root,
        }
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("default_root", &self.default_root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::scanner;

    #[test]
    fn test_relative_default_root_is_made_absolute() {
        let missing = PathBuf::from("not-created-workbench-root");
        let catalog = Catalog::new(Library::open_in_memory().unwrap(), missing.clone());

        let root = catalog.root();
        assert!(root.is_absolute());
        assert_eq!(root, std::env::current_dir().unwrap().join(missing));
    }

    #[test]
    fn test_scan_under_relative_default_root_stores_absolute_paths() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = dir.path().to_path_buf();
        assert!(relative.is_relative());
        fs::create_dir(dir.path().join("p")).unwrap();
        fs::write(dir.path().join("p/a.png"), b"a").unwrap();

        let catalog = Catalog::new(Library::open_in_memory().unwrap(), relative);
        assert_eq!(catalog.root(), fs::canonicalize(dir.path()).unwrap());

        scanner::scan(&catalog).unwrap();
        let library = catalog.library();
        let asset = library.get_asset("p", "a.png").unwrap().unwrap();
        assert!(Path::new(&asset.full_path).is_absolute());
        assert!(Path::new(&library.get_project("p").unwrap().unwrap().full_path).is_absolute());
    }
}
