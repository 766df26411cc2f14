//! SQLite connection bootstrap.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Open (creating if missing) the backing database for `config`.
///
/// A path of `:memory:` yields a private in-memory database. One pool,
/// one owning process: the store is a single-writer design.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    let options = if db_path.as_os_str() == ":memory:" {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
    };

    // A single pinned connection keeps in-memory databases coherent
    // across calls and matches the sequential single-writer model for
    // file stores.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None::<std::time::Duration>)
        .max_lifetime(None::<std::time::Duration>)
        .connect_with(options)
        .await?;

    Ok(pool)
}
