use std::path::PathBuf;

/// Errors raised by the catalog, the reconcilers and the asset facade.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Root directory {} is not usable: {reason}", .path.display())]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
