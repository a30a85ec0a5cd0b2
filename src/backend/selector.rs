use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use super::{BackendKind, FallbackBackend, JsonBackend, MetadataBackend, SqliteBackend};
use crate::config::AppConfig;
use crate::db::open_sqlite_pool;
use crate::error::ERR_BACKEND_UNAVAILABLE;
use crate::migrate::apply_migrations;
use crate::AppError;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("database backend disabled by configuration")]
    Disabled,
    #[error("failed to open database: {0}")]
    Open(#[source] AppError),
    #[error("failed to apply migrations: {0}")]
    Migrate(anyhow::Error),
    #[error("probe query failed: {0}")]
    Query(#[source] AppError),
}

impl From<ProbeError> for AppError {
    fn from(err: ProbeError) -> Self {
        AppError::new(ERR_BACKEND_UNAVAILABLE, err.to_string())
    }
}

/// The backend chosen for the lifetime of the process.
#[derive(Clone)]
pub struct ActiveBackend {
    pub kind: BackendKind,
    pub backend: Arc<dyn MetadataBackend>,
    /// Why the database was not used, when it was not.
    pub degraded: Option<String>,
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("kind", &self.kind)
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Open the pool, apply migrations and run a trivial query.
pub async fn probe_database(url: &str) -> Result<SqlitePool, ProbeError> {
    let pool = open_sqlite_pool(url).await.map_err(ProbeError::Open)?;
    if let Err(err) = apply_migrations(&pool).await {
        pool.close().await;
        return Err(ProbeError::Migrate(err));
    }
    if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
        pool.close().await;
        return Err(ProbeError::Query(err.into()));
    }
    Ok(pool)
}

/// Decide the backend once. A failed probe is absorbed: the process continues
/// on the JSON documents and the reason is logged and reported.
pub async fn select_backend(config: &AppConfig) -> ActiveBackend {
    let json: Arc<dyn MetadataBackend> = Arc::new(JsonBackend::new(
        config.categories_file(),
        config.icons_file(),
    ));

    let probe = if config.use_database {
        probe_database(&config.database_url).await
    } else {
        Err(ProbeError::Disabled)
    };

    match probe {
        Ok(pool) => {
            let sqlite: Arc<dyn MetadataBackend> = Arc::new(SqliteBackend::new(pool));
            info!(target: "iconvault", event = "backend_selected", backend = "database");
            ActiveBackend {
                kind: BackendKind::Database,
                backend: Arc::new(FallbackBackend::new(sqlite, json)),
                degraded: None,
            }
        }
        Err(ProbeError::Disabled) => {
            info!(
                target: "iconvault",
                event = "backend_selected",
                backend = "file_system",
                reason = "disabled",
            );
            ActiveBackend {
                kind: BackendKind::FileSystem,
                backend: json,
                degraded: None,
            }
        }
        Err(err) => {
            warn!(
                target: "iconvault",
                event = "backend_degraded",
                backend = "file_system",
                error = %err,
            );
            ActiveBackend {
                kind: BackendKind::FileSystem,
                backend: json,
                degraded: Some(err.to_string()),
            }
        }
    }
}
