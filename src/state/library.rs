use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::info;

use super::data::{from_millis, Asset, MediaType, Project};
use crate::error::Result;

const ASSET_COLUMNS: &str =
    "id, filename, project_id, full_path, media_type, size, mtime, created_at";

/// The Library manages the SQLite catalog database.
/// It stores the path configuration plus one row per project directory
/// and one row per indexed media file.
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
}

impl Library {
    /// Open (or create) the catalog at `db_path` and initialize the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "catalog database opened");

        let library = Library {
            conn,
            db_path: db_path.to_path_buf(),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Private in-memory catalog, used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let library = Library {
            conn: Connection::open_in_memory()?,
            db_path: PathBuf::from(":memory:"),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Creates all tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key             TEXT PRIMARY KEY,
                value           TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                full_path       TEXT NOT NULL,
                asset_count     INTEGER NOT NULL DEFAULT 0,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assets (
                project_id      TEXT NOT NULL,
                id              TEXT NOT NULL,
                filename        TEXT NOT NULL,
                full_path       TEXT NOT NULL,
                media_type      TEXT NOT NULL,
                size            INTEGER NOT NULL,
                mtime           INTEGER NOT NULL,
                created_at      INTEGER NOT NULL,
                PRIMARY KEY (project_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_assets_project_mtime
                ON assets(project_id, mtime DESC);",
        )?;
        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    // ========== Settings ==========

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Single-statement upsert, so a failed write leaves the old value intact.
    pub fn put_setting(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now.timestamp_millis()],
        )?;
        Ok(())
    }

    // ========== Projects ==========

    /// All projects ordered by display name
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, full_path, asset_count, updated_at FROM projects ORDER BY name, id",
        )?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Every project id known to the catalog, including ids that only
    /// survive as the owner of orphaned asset rows.
    pub fn list_project_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM projects UNION SELECT project_id FROM assets")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, name, full_path, asset_count, updated_at FROM projects WHERE id = ?1",
                [id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    /// Insert or fully overwrite a project row.
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (id, name, full_path, asset_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                full_path = excluded.full_path,
                asset_count = excluded.asset_count,
                updated_at = excluded.updated_at",
            params![
                project.id,
                project.name,
                project.full_path,
                project.asset_count,
                project.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Create the project if missing, otherwise refresh its path and
    /// `updated_at`. The asset count is left alone.
    pub fn touch_project(&self, id: &str, full_path: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (id, name, full_path, asset_count, updated_at)
             VALUES (?1, ?1, ?2, 0, ?3)
             ON CONFLICT(id) DO UPDATE SET
                full_path = excluded.full_path,
                updated_at = excluded.updated_at",
            params![id, full_path, now.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Recompute the cached asset count from the asset table.
    pub fn refresh_asset_count(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE projects
             SET asset_count = (SELECT COUNT(*) FROM assets WHERE project_id = ?1),
                 updated_at = ?2
             WHERE id = ?1",
            params![id, now.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Cascade delete: every asset of the project, then the project row.
    /// Two separate statements; a failure between them leaves orphans
    /// that the next full scan removes.
    ///
    /// Returns true if a project row was removed.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        self.conn
            .execute("DELETE FROM assets WHERE project_id = ?1", [id])?;
        let removed = self.conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    /// Move a project row and all of its assets to a new id and directory.
    ///
    /// Issued as independent statements with no rollback: if the store fails
    /// midway some assets keep the old prefix until the next scan.
    pub fn rename_project_rows(
        &self,
        old_id: &str,
        new_id: &str,
        new_full_path: &Path,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(old) = self.get_project(old_id)? else {
            return Ok(());
        };

        self.upsert_project(&Project {
            id: new_id.to_string(),
            name: new_id.to_string(),
            full_path: new_full_path.to_string_lossy().into_owned(),
            asset_count: old.asset_count,
            updated_at: now,
        })?;

        let old_prefix = PathBuf::from(&old.full_path);
        let mut stmt = self
            .conn
            .prepare("SELECT id, full_path FROM assets WHERE project_id = ?1")?;
        let rows = stmt
            .query_map([old_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (asset_id, full_path) in rows {
            let rewritten = match Path::new(&full_path).strip_prefix(&old_prefix) {
                Ok(rest) => new_full_path.join(rest),
                Err(_) => PathBuf::from(&full_path),
            };
            self.conn.execute(
                "UPDATE assets SET project_id = ?1, full_path = ?2 WHERE project_id = ?3 AND id = ?4",
                params![new_id, rewritten.to_string_lossy(), old_id, asset_id],
            )?;
        }

        self.conn
            .execute("DELETE FROM projects WHERE id = ?1", [old_id])?;
        Ok(())
    }

    // ========== Assets ==========

    /// Replace every asset of a project with `assets` in one transaction.
    pub fn replace_project_assets(&self, project_id: &str, assets: &[Asset]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM assets WHERE project_id = ?1", [project_id])?;
        {
            // Same base name twice under one project: last one wins
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO assets
                    (id, filename, project_id, full_path, media_type, size, mtime, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for asset in assets {
                insert.execute(params![
                    asset.id,
                    asset.filename,
                    project_id,
                    asset.full_path,
                    asset.media_type.as_str(),
                    asset.size as i64,
                    asset.mtime.timestamp_millis(),
                    asset.created_at.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or refresh a single asset. `created_at` survives updates.
    pub fn upsert_asset(&self, asset: &Asset) -> Result<()> {
        self.conn.execute(
            "INSERT INTO assets
                (id, filename, project_id, full_path, media_type, size, mtime, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, id) DO UPDATE SET
                filename = excluded.filename,
                full_path = excluded.full_path,
                media_type = excluded.media_type,
                size = excluded.size,
                mtime = excluded.mtime",
            params![
                asset.id,
                asset.filename,
                asset.project_id,
                asset.full_path,
                asset.media_type.as_str(),
                asset.size as i64,
                asset.mtime.timestamp_millis(),
                asset.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Returns true if a row was removed.
    pub fn delete_asset(&self, project_id: &str, id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM assets WHERE project_id = ?1 AND id = ?2",
            params![project_id, id],
        )?;
        Ok(removed > 0)
    }

    /// Remove every asset of the project stored at or below `dir`.
    pub fn delete_assets_under(&self, project_id: &str, dir: &Path) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, full_path FROM assets WHERE project_id = ?1")?;
        let doomed = stmt
            .query_map([project_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, full_path)| Path::new(full_path).starts_with(dir))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        for id in &doomed {
            self.delete_asset(project_id, id)?;
        }
        Ok(doomed.len())
    }

    pub fn get_asset(&self, project_id: &str, id: &str) -> Result<Option<Asset>> {
        let asset = self
            .conn
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE project_id = ?1 AND id = ?2"),
                params![project_id, id],
                asset_from_row,
            )
            .optional()?;
        Ok(asset)
    }

    pub fn count_assets(&self, project_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM assets WHERE project_id = ?1",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get a slice of a project's assets, most recently modified first
    pub fn list_assets(&self, project_id: &str, limit: u32, offset: u64) -> Result<Vec<Asset>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE project_id = ?1
             ORDER BY mtime DESC, id ASC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let assets = stmt
            .query_map(params![project_id, limit, offset as i64], asset_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }

    /// Point an asset row at its new on-disk name.
    pub fn rename_asset_row(
        &self,
        project_id: &str,
        old_id: &str,
        new_id: &str,
        new_full_path: &Path,
        media_type: MediaType,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE assets SET id = ?1, filename = ?1, full_path = ?2, media_type = ?3
             WHERE project_id = ?4 AND id = ?5",
            params![
                new_id,
                new_full_path.to_string_lossy(),
                media_type.as_str(),
                project_id,
                old_id,
            ],
        )?;
        Ok(())
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        full_path: row.get(2)?,
        asset_count: row.get(3)?,
        updated_at: from_millis(row.get(4)?),
    })
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let media_type: String = row.get(4)?;
    let size: i64 = row.get(5)?;
    Ok(Asset {
        id: row.get(0)?,
        filename: row.get(1)?,
        project_id: row.get(2)?,
        full_path: row.get(3)?,
        media_type: MediaType::parse(&media_type),
        size: size.max(0) as u64,
        mtime: from_millis(row.get(6)?),
        created_at: from_millis(row.get(7)?),
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
