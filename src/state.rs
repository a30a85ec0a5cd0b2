use std::sync::Arc;

use serde::Serialize;

use crate::backend::{select_backend, ActiveBackend, BackendKind, MetadataBackend};
use crate::categories::CategoryStore;
use crate::config::AppConfig;
use crate::icons::IconStore;
use crate::model::Category;
use crate::vault::Vault;
use crate::{AppError, AppResult};

/// Process-wide handle: configuration, storage root, the backend chosen at
/// startup and the two stores built on top of them.
#[derive(Clone)]
pub struct Library {
    config: Arc<AppConfig>,
    vault: Arc<Vault>,
    active: ActiveBackend,
    categories: CategoryStore,
    icons: IconStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryStatus {
    pub backend: BackendKind,
    pub degraded: Option<String>,
    pub default_category: Category,
    pub categories: usize,
    pub icons: usize,
}

impl Library {
    /// Create the data and storage directories, select the backend and make
    /// sure the default category exists.
    pub async fn open(config: AppConfig) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|err| {
            AppError::from(err).with_context("operation", "create_data_dir")
        })?;
        let active = select_backend(&config).await;
        Self::with_backend(config, active).await
    }

    /// Wire a library around an already chosen backend.
    pub async fn with_backend(config: AppConfig, active: ActiveBackend) -> AppResult<Self> {
        let vault = Arc::new(Vault::open(&config.storage_root)?);
        let categories = CategoryStore::new(
            active.backend.clone(),
            vault.clone(),
            config.default_category.clone(),
        );
        let icons = IconStore::new(active.backend.clone(), vault.clone());
        categories.ensure_default().await?;

        Ok(Self {
            config: Arc::new(config),
            vault,
            active,
            categories,
            icons,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn vault(&self) -> Arc<Vault> {
        self.vault.clone()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.active.kind
    }

    pub fn backend(&self) -> Arc<dyn MetadataBackend> {
        self.active.backend.clone()
    }

    pub fn categories(&self) -> &CategoryStore {
        &self.categories
    }

    pub fn icons(&self) -> &IconStore {
        &self.icons
    }

    pub async fn status(&self) -> AppResult<LibraryStatus> {
        Ok(LibraryStatus {
            backend: self.active.kind,
            degraded: self.active.degraded.clone(),
            default_category: self.categories.default_category().await?,
            categories: self.categories.list().await?.len(),
            icons: self.icons.list(None).await?.len(),
        })
    }
}
