use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{BackendKind, MetadataBackend};
use crate::db::write_atomic;
use crate::error::ERR_DUPLICATE_NAME;
use crate::model::{normalize_tags, Category, Icon, NewIcon};
use crate::security::hash_path;
use crate::{AppError, AppResult};

/// Two JSON documents: an array of categories and an array of icons.
///
/// Every mutation is load, modify, atomic rewrite, serialized by one lock.
/// A document that fails to parse is reported and left untouched.
#[derive(Debug)]
pub struct JsonBackend {
    categories_path: PathBuf,
    icons_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonBackend {
    pub fn new(categories_path: impl Into<PathBuf>, icons_path: impl Into<PathBuf>) -> Self {
        Self {
            categories_path: categories_path.into(),
            icons_path: icons_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn categories_path(&self) -> &Path {
        &self.categories_path
    }

    pub fn icons_path(&self) -> &Path {
        &self.icons_path
    }

    async fn categories(&self) -> AppResult<Vec<Category>> {
        load(&self.categories_path).await
    }

    async fn icons(&self) -> AppResult<Vec<Icon>> {
        load(&self.icons_path).await
    }

    /// Persist a category change that also rewrote icons, given as
    /// `(updated, original)`. Icons are written first; if the categories
    /// write then fails, the original icons document is put back.
    async fn save_category_change(
        &self,
        categories: &[Category],
        icons: Option<(&[Icon], &[Icon])>,
    ) -> AppResult<()> {
        let Some((updated, original)) = icons else {
            return save(&self.categories_path, categories).await;
        };
        save(&self.icons_path, updated).await?;
        let Err(err) = save(&self.categories_path, categories).await else {
            return Ok(());
        };
        match save(&self.icons_path, original).await {
            Ok(()) => Err(err),
            Err(restore_err) => {
                tracing::error!(
                    target: "iconvault",
                    event = "json_icons_restore_failed",
                    path_hash = %hash_path(&self.icons_path),
                    error = %restore_err,
                );
                Err(err.with_context("restore_error", restore_err.to_string()))
            }
        }
    }
}

async fn load<T: DeserializeOwned>(path: &Path) -> AppResult<Vec<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(AppError::from(err)
                .with_context("operation", "json_read")
                .with_context("path_hash", hash_path(path)))
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&raw).map_err(|err| {
        tracing::error!(
            target: "iconvault",
            event = "json_document_unreadable",
            path_hash = %hash_path(path),
            error = %err,
        );
        AppError::from(err)
            .with_context("operation", "json_parse")
            .with_context("path_hash", hash_path(path))
    })
}

// Serialization happens inline; directory creation, write and fsync run on
// the blocking pool.
async fn save<T: Serialize>(path: &Path, records: &[T]) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::from(err).with_context("operation", "json_create_dir"))?;
        }
        write_atomic(&path, &bytes)
    })
    .await
    .map_err(|err| {
        AppError::new("TASK/JOIN", err.to_string()).with_context("operation", "json_save")
    })?
}

fn next_id<T>(records: &[T], id: impl Fn(&T) -> i64) -> i64 {
    records.iter().map(id).max().unwrap_or(0) + 1
}

fn location_taken(icons: &[Icon], category_name: &str, filename: &str, except: i64) -> bool {
    icons
        .iter()
        .any(|i| i.id != except && i.category_name == category_name && i.filename == filename)
}

fn location_error(category_name: &str, filename: &str) -> AppError {
    AppError::new(
        ERR_DUPLICATE_NAME,
        "Another icon already occupies this location.",
    )
    .with_context("category", category_name.to_string())
    .with_context("filename", filename.to_string())
}

#[async_trait]
impl MetadataBackend for JsonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FileSystem
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let _guard = self.lock.lock().await;
        self.categories().await
    }

    async fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        let _guard = self.lock.lock().await;
        Ok(self.categories().await?.into_iter().find(|c| c.id == id))
    }

    async fn find_category_by_name(&self, name: &str) -> AppResult<Option<Category>> {
        let _guard = self.lock.lock().await;
        Ok(self.categories().await?.into_iter().find(|c| c.name == name))
    }

    async fn insert_category(&self, name: &str) -> AppResult<Category> {
        let _guard = self.lock.lock().await;
        let mut categories = self.categories().await?;
        if categories.iter().any(|c| c.name == name) {
            return Err(AppError::duplicate_name(name));
        }
        let now = Utc::now();
        let category = Category {
            id: next_id(&categories, |c| c.id),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        categories.push(category.clone());
        save(&self.categories_path, &categories).await?;
        Ok(category)
    }

    async fn rename_category(&self, id: i64, name: &str) -> AppResult<Option<Category>> {
        let _guard = self.lock.lock().await;
        let mut categories = self.categories().await?;
        if categories.iter().any(|c| c.id != id && c.name == name) {
            return Err(AppError::duplicate_name(name));
        }
        let Some(category) = categories.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        category.name = name.to_string();
        category.updated_at = Utc::now();
        let renamed = category.clone();

        let mut icons = self.icons().await?;
        let original_icons = icons.clone();
        let mut touched = false;
        for icon in icons.iter_mut().filter(|i| i.category_id == Some(id)) {
            icon.category_name = name.to_string();
            touched = true;
        }

        let icons_change = touched.then_some((icons.as_slice(), original_icons.as_slice()));
        self.save_category_change(&categories, icons_change).await?;
        Ok(Some(renamed))
    }

    async fn delete_category(&self, id: i64) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let mut categories = self.categories().await?;
        let before = categories.len();
        categories.retain(|c| c.id != id);
        if categories.len() == before {
            return Ok(false);
        }

        // Mirror ON DELETE SET NULL for any icon that was not reassigned.
        let mut icons = self.icons().await?;
        let original_icons = icons.clone();
        let mut touched = false;
        for icon in icons.iter_mut().filter(|i| i.category_id == Some(id)) {
            icon.category_id = None;
            touched = true;
        }

        let icons_change = touched.then_some((icons.as_slice(), original_icons.as_slice()));
        self.save_category_change(&categories, icons_change).await?;
        Ok(true)
    }

    async fn list_icons(&self, category_id: Option<i64>) -> AppResult<Vec<Icon>> {
        let _guard = self.lock.lock().await;
        let icons = self.icons().await?;
        Ok(match category_id {
            Some(category_id) => icons
                .into_iter()
                .filter(|i| i.category_id == Some(category_id))
                .collect(),
            None => icons,
        })
    }

    async fn get_icon(&self, id: i64) -> AppResult<Option<Icon>> {
        let _guard = self.lock.lock().await;
        Ok(self.icons().await?.into_iter().find(|i| i.id == id))
    }

    async fn insert_icon(&self, new: NewIcon) -> AppResult<Icon> {
        let _guard = self.lock.lock().await;
        let mut icons = self.icons().await?;
        if location_taken(&icons, &new.category_name, &new.filename, 0) {
            return Err(location_error(&new.category_name, &new.filename));
        }
        let now = Utc::now();
        let icon = Icon {
            id: next_id(&icons, |i| i.id),
            filename: new.filename,
            original_filename: new.original_filename,
            category_id: Some(new.category_id),
            category_name: new.category_name,
            created_at: now,
            updated_at: now,
            tags: normalize_tags(&new.tags),
            description: new.description,
            is_favorite: false,
        };
        icons.push(icon.clone());
        save(&self.icons_path, &icons).await?;
        Ok(icon)
    }

    async fn update_icon(&self, icon: &Icon) -> AppResult<Option<Icon>> {
        let _guard = self.lock.lock().await;
        let mut icons = self.icons().await?;
        if location_taken(&icons, &icon.category_name, &icon.filename, icon.id) {
            return Err(location_error(&icon.category_name, &icon.filename));
        }
        let Some(stored) = icons.iter_mut().find(|i| i.id == icon.id) else {
            return Ok(None);
        };
        stored.filename = icon.filename.clone();
        stored.category_id = icon.category_id;
        stored.category_name = icon.category_name.clone();
        stored.tags = normalize_tags(&icon.tags);
        stored.description = icon.description.clone();
        stored.is_favorite = icon.is_favorite;
        stored.updated_at = Utc::now();
        let updated = stored.clone();
        save(&self.icons_path, &icons).await?;
        Ok(Some(updated))
    }

    async fn delete_icon(&self, id: i64) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let mut icons = self.icons().await?;
        let before = icons.len();
        icons.retain(|i| i.id != id);
        if icons.len() == before {
            return Ok(false);
        }
        save(&self.icons_path, &icons).await?;
        Ok(true)
    }
}
