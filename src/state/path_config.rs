//! Persisted root directory configuration
//!
//! The root is a single keyed row in the settings table. It is validated
//! only when set; a root that disappears later is a runtime condition the
//! scanner and watcher tolerate.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::library::Library;
use crate::error::{CatalogError, Result};

/// Settings key holding the root directory
pub const ROOT_KEY: &str = "root";

/// The persisted root, or `default` when none is configured.
pub fn get_root(library: &Library, default: &Path) -> PathBuf {
    match library.get_setting(ROOT_KEY) {
        Ok(Some(value)) => PathBuf::from(value),
        Ok(None) => default.to_path_buf(),
        Err(e) => {
            warn!(error = %e, "failed to read configured root, using default");
            default.to_path_buf()
        }
    }
}

/// Validate `candidate` and persist its canonical form.
///
/// Nothing is written unless the directory exists and can be listed.
pub fn set_root(library: &Library, candidate: &Path) -> Result<PathBuf> {
    let root = normalize_root(candidate)?;
    library.put_setting(ROOT_KEY, &root.to_string_lossy(), Utc::now())?;
    info!(root = %root.display(), "root directory updated");
    Ok(root)
}

/// Absolute, canonical path of an existing readable directory.
pub fn normalize_root(candidate: &Path) -> Result<PathBuf> {
    let invalid = |reason: String| CatalogError::InvalidRoot {
        path: candidate.to_path_buf(),
        reason,
    };

    if candidate.as_os_str().is_empty() {
        return Err(invalid("path is empty".to_string()));
    }

    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| invalid(e.to_string()))?
            .join(candidate)
    };

    let canonical = fs::canonicalize(&absolute).map_err(|e| invalid(e.to_string()))?;
    if !canonical.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    fs::read_dir(&canonical).map_err(|e| invalid(e.to_string()))?;

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        let library = Library::open_in_memory().unwrap();
        let default = Path::new("/srv/workbench");
        assert_eq!(get_root(&library, default), default);
    }

    #[test]
    fn test_set_root_persists_canonical_path() {
        let library = Library::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();

        let messy = dir.path().join("inner").join("..").join("inner");
        let root = set_root(&library, &messy).unwrap();

        let expected = fs::canonicalize(dir.path().join("inner")).unwrap();
        assert_eq!(root, expected);
        assert_eq!(get_root(&library, Path::new("/unused")), expected);
    }

    #[test]
    fn test_missing_directory_is_rejected_without_mutation() {
        let library = Library::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        set_root(&library, dir.path()).unwrap();
        let before = get_root(&library, Path::new("/unused"));

        let err = set_root(&library, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRoot { .. }));
        assert_eq!(get_root(&library, Path::new("/unused")), before);
    }

    #[test]
    fn test_file_is_rejected() {
        let library = Library::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shot.png");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            set_root(&library, &file),
            Err(CatalogError::InvalidRoot { .. })
        ));
        assert_eq!(library.get_setting(ROOT_KEY).unwrap(), None);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        assert!(normalize_root(Path::new("")).is_err());
    }
}
