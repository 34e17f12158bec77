/// State management module
///
/// This module handles all catalog state, including:
/// - Database connection and queries (library.rs)
/// - Shared data structures (data.rs)
/// - The persisted root directory (path_config.rs)
/// - The process-wide handle shared by scanner, watcher and HTTP layer (catalog.rs)

pub mod catalog;
pub mod data;
pub mod library;
pub mod path_config;
