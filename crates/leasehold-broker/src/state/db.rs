//! Database setup and schema management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Database connection pool type alias
pub type DbPool = SqlitePool;

/// Default state database path
fn default_db_path() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "leasehold").context("Failed to get project directories")?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;

    Ok(state_dir.join("state.db"))
}

/// Open the state database, creating it and its schema if needed.
///
/// Uses the per-user data directory unless `path` is given.
pub async fn open_db(path: Option<&Path>) -> Result<DbPool> {
    let path = match path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create state directory")?;
            }
            p.to_path_buf()
        }
        None => default_db_path()?,
    };
    let db_url = format!("sqlite://{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open state database")?;

    setup_schema(&pool)
        .await
        .context("Failed to create state schema")?;
    debug!(path = %path.display(), "State database ready");

    Ok(pool)
}

/// Create tables and indexes if they do not exist yet
pub async fn setup_schema(pool: &DbPool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            alias TEXT PRIMARY KEY,
            physical_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            status TEXT NOT NULL,
            desired_duration_days INTEGER NOT NULL CHECK (desired_duration_days > 0),
            assigned_resource_id TEXT,
            start_at TEXT,
            end_at TEXT,
            event_date TEXT NOT NULL,
            version_tag TEXT,
            description TEXT NOT NULL DEFAULT '',
            collaborators TEXT NOT NULL,
            created_at TEXT NOT NULL,
            returned_at TEXT,
            released_resource_id TEXT,
            reminder_sent_at TEXT,
            overdue_notified_at TEXT,
            CHECK ((status = 'active') = (assigned_resource_id IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leases_status ON leases(status)")
        .execute(pool)
        .await?;
    // At most one active lease per resource
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_leases_active_resource
         ON leases(assigned_resource_id) WHERE status = 'active'",
    )
    .execute(pool)
    .await?;

    Ok(())
}
