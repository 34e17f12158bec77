//! Translation of raw `notify` events into catalog-level change events.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use std::fs;
use std::path::{Path, PathBuf};

/// A single filesystem change, as the catalog understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared
    Add(PathBuf),
    /// A file's contents or metadata changed
    Change(PathBuf),
    /// A file was removed
    Unlink(PathBuf),
    /// A directory appeared
    AddDir(PathBuf),
    /// A directory was removed
    UnlinkDir(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Add(p)
            | WatchEvent::Change(p)
            | WatchEvent::Unlink(p)
            | WatchEvent::AddDir(p)
            | WatchEvent::UnlinkDir(p) => p,
        }
    }
}

/// Map one `notify` event onto zero or more catalog events.
///
/// Renames become a removal of the old path followed by an add of the new
/// one. When the backend cannot tell a file from a directory, the path is
/// probed on disk if it still exists and guessed from its extension if not.
pub fn from_notify(event: &Event) -> Vec<WatchEvent> {
    match &event.kind {
        EventKind::Access(_) => Vec::new(),

        EventKind::Create(CreateKind::File) => {
            event.paths.iter().cloned().map(WatchEvent::Add).collect()
        }
        EventKind::Create(CreateKind::Folder) => {
            event.paths.iter().cloned().map(WatchEvent::AddDir).collect()
        }
        EventKind::Create(_) => event.paths.iter().filter_map(|p| probe(p)).collect(),

        EventKind::Modify(ModifyKind::Name(mode)) => renamed(mode, &event.paths),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .map(WatchEvent::Change)
            .collect(),

        EventKind::Remove(RemoveKind::File) => {
            event.paths.iter().cloned().map(WatchEvent::Unlink).collect()
        }
        EventKind::Remove(RemoveKind::Folder) => {
            event.paths.iter().cloned().map(WatchEvent::UnlinkDir).collect()
        }
        EventKind::Remove(_) => event.paths.iter().map(|p| removal(p)).collect(),

        EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .map(|p| probe(p).unwrap_or_else(|| removal(p)))
            .collect(),
    }
}

fn renamed(mode: &RenameMode, paths: &[PathBuf]) -> Vec<WatchEvent> {
    match mode {
        RenameMode::Both => {
            let mut events = Vec::new();
            if let [from, to, ..] = paths {
                events.push(removal(from));
                events.extend(probe(to));
            }
            events
        }
        RenameMode::From => paths.iter().map(|p| removal(p)).collect(),
        RenameMode::To => paths.iter().filter_map(|p| probe(p)).collect(),
        RenameMode::Any | RenameMode::Other => paths
            .iter()
            .map(|p| probe(p).unwrap_or_else(|| removal(p)))
            .collect(),
    }
}

/// Classify an existing path as a file or directory addition.
fn probe(path: &Path) -> Option<WatchEvent> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.is_dir() {
        Some(WatchEvent::AddDir(path.to_path_buf()))
    } else {
        Some(WatchEvent::Add(path.to_path_buf()))
    }
}

/// A path that is already gone: files are assumed to carry an extension.
fn removal(path: &Path) -> WatchEvent {
    if path.extension().is_some() {
        WatchEvent::Unlink(path.to_path_buf())
    } else {
        WatchEvent::UnlinkDir(path.to_path_buf())
    }
}
