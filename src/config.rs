use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

const APP_DIR: &str = "creative-workbench";
const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Startup settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root used until one is persisted through `PATCH /api/root`
    pub default_root: PathBuf,
    /// SQLite catalog file
    pub db_path: PathBuf,
    pub bind: SocketAddr,
}

impl Settings {
    /// Load settings from the process environment, honouring a `.env` file.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = app_data_dir();

        let default_root = lookup("WORKBENCH_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("projects"));

        let db_path = lookup("WORKBENCH_DB")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("catalog.db"));

        let bind_raw = lookup("WORKBENCH_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("WORKBENCH_BIND is not a socket address: {bind_raw}"))?;

        Ok(Settings {
            default_root,
            db_path,
            bind,
        })
    }
}

/// `<data_dir>/creative-workbench`, falling back to the home directory and
/// then the working directory.
fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
