use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

use crate::security::hash_path;
use crate::{AppError, AppResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Open the metadata database. File-backed URLs get WAL and their parent
/// directory created; in-memory URLs are pinned to a single connection so
/// every query sees the same database.
pub async fn open_sqlite_pool(url: &str) -> AppResult<Pool<Sqlite>> {
    let memory = is_memory_url(url);
    let mut opts = SqliteConnectOptions::from_str(url)
        .map_err(|err| AppError::from(err).with_context("operation", "parse_database_url"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    if !memory {
        let db_path = opts.get_filename().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                tracing::error!(
                    target: "iconvault",
                    event = "db_dir_create_failed",
                    error = %err,
                    path_hash = %hash_path(parent),
                );
                AppError::from(err).with_context("operation", "create_database_dir")
            })?;
        }
        tracing::info!(target: "iconvault", event = "db_path", path_hash = %hash_path(&db_path));
        opts = opts
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }

    let mut pool_opts = SqlitePoolOptions::new().max_connections(if memory { 1 } else { 8 });
    if memory {
        pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_opts
        .connect_with(opts)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "open_database"))?;

    log_effective_pragmas(&pool, memory).await;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>, memory: bool) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "iconvault",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        memory,
    );

    if !memory && !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "iconvault",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Replace `path` with `bytes` through a synced temp file in the same
/// directory. The parent directory must already exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let context = |err: std::io::Error, operation: &str| {
        AppError::from(err)
            .with_context("operation", operation.to_string())
            .with_context("path_hash", hash_path(path))
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|err| context(err, "write_atomic_create"))?;
    tmp.write_all(bytes)
        .map_err(|err| context(err, "write_atomic_write"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| context(err, "write_atomic_sync"))?;
    tmp.persist(path)
        .map_err(|err| context(err.error, "write_atomic_persist"))?;
    Ok(())
}
