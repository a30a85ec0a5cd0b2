use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::MetadataBackend;
use crate::coordinator::{move_icon, resolve_conflict_name, Destination};
use crate::error::ErrorKind;
use crate::model::{Category, CategorySummary, Icon};
use crate::sanitize::validate_component;
use crate::vault::Vault;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryDeleted {
    pub id: i64,
    pub name: String,
    /// Icons moved into the default category.
    pub reassigned: usize,
}

/// Category records plus their directories under the storage root. The
/// default category always exists and can be neither renamed nor deleted.
#[derive(Clone)]
pub struct CategoryStore {
    backend: Arc<dyn MetadataBackend>,
    vault: Arc<Vault>,
    default_name: Arc<str>,
}

impl CategoryStore {
    pub fn new(
        backend: Arc<dyn MetadataBackend>,
        vault: Arc<Vault>,
        default_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            backend,
            vault,
            default_name: default_name.into(),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn is_default(&self, category: &Category) -> bool {
        category.name == *self.default_name
    }

    /// Create the default category (record and directory) if it is missing.
    pub async fn ensure_default(&self) -> AppResult<Category> {
        let category = match self.backend.find_category_by_name(&self.default_name).await? {
            Some(category) => category,
            None => {
                let category = self.backend.insert_category(&self.default_name).await?;
                info!(
                    target: "iconvault",
                    event = "default_category_created",
                    category_id = category.id,
                );
                category
            }
        };
        self.vault.ensure_category_dir(&category.name).await?;
        Ok(category)
    }

    pub async fn default_category(&self) -> AppResult<Category> {
        match self.backend.find_category_by_name(&self.default_name).await? {
            Some(category) => Ok(category),
            None => self.ensure_default().await,
        }
    }

    pub async fn list(&self) -> AppResult<Vec<Category>> {
        self.backend.list_categories().await
    }

    pub async fn list_with_counts(&self) -> AppResult<Vec<CategorySummary>> {
        let categories = self.backend.list_categories().await?;
        let mut counts: HashMap<i64, u64> = HashMap::new();
        for icon in self.backend.list_icons(None).await? {
            if let Some(id) = icon.category_id {
                *counts.entry(id).or_default() += 1;
            }
        }
        Ok(categories
            .into_iter()
            .map(|category| CategorySummary {
                icon_count: counts.get(&category.id).copied().unwrap_or(0),
                category,
            })
            .collect())
    }

    pub async fn get(&self, id: i64) -> AppResult<Category> {
        self.backend
            .get_category(id)
            .await?
            .ok_or_else(|| AppError::not_found("category", id))
    }

    pub async fn create(&self, name: &str) -> AppResult<Category> {
        let name = name.trim();
        validate_component(name)?;
        if self.backend.find_category_by_name(name).await?.is_some() {
            return Err(AppError::duplicate_name(name));
        }
        // A pre-existing directory is adopted as-is.
        self.vault.ensure_category_dir(name).await?;
        let category = self.backend.insert_category(name).await?;
        info!(target: "iconvault", event = "category_created", category_id = category.id);
        Ok(category)
    }

    pub async fn rename(&self, id: i64, new_name: &str) -> AppResult<Category> {
        let current = self.get(id).await?;
        if self.is_default(&current) {
            return Err(AppError::default_category(&current.name));
        }
        let new_name = new_name.trim();
        validate_component(new_name)?;
        if new_name == current.name {
            return Ok(current);
        }
        if self.backend.find_category_by_name(new_name).await?.is_some() {
            return Err(AppError::duplicate_name(new_name));
        }

        // Rejects an existing target directory before any metadata changes.
        let dir_renamed = self
            .vault
            .rename_category_dir(&current.name, new_name)
            .await?;

        let failure = match self.backend.rename_category(id, new_name).await {
            Ok(Some(category)) => {
                info!(target: "iconvault", event = "category_renamed", category_id = id);
                return Ok(category);
            }
            Ok(None) => AppError::not_found("category", id),
            Err(err) => err,
        };

        if dir_renamed {
            if let Err(undo_err) = self.vault.rename_category_dir(new_name, &current.name).await {
                warn!(
                    target: "iconvault",
                    event = "category_dir_undo_failed",
                    category_id = id,
                    error = %undo_err,
                );
            }
        }
        Err(failure)
    }

    /// Reassign every icon to the default category, then drop the record.
    /// Directory removal afterwards is best effort.
    pub async fn delete(&self, id: i64) -> AppResult<CategoryDeleted> {
        let category = self.get(id).await?;
        if self.is_default(&category) {
            return Err(AppError::default_category(&category.name));
        }
        let fallback = self.default_category().await?;
        self.vault.ensure_category_dir(&fallback.name).await?;

        let icons = self.backend.list_icons(Some(id)).await?;
        let reassigned = icons.len();
        for icon in &icons {
            self.reassign(icon, &fallback).await?;
        }

        if !self.backend.delete_category(id).await? {
            return Err(AppError::not_found("category", id));
        }
        self.vault.remove_category_dir(&category.name).await;

        info!(
            target: "iconvault",
            event = "category_deleted",
            category_id = id,
            reassigned,
        );
        Ok(CategoryDeleted {
            id,
            name: category.name,
            reassigned,
        })
    }

    async fn reassign(&self, icon: &Icon, target: &Category) -> AppResult<Icon> {
        let dest = Destination {
            category_id: Some(target.id),
            category_name: &target.name,
            filename: &icon.filename,
        };
        match move_icon(self.backend.as_ref(), &self.vault, icon, dest).await {
            Err(err) if err.kind() == ErrorKind::FileMissing => {
                warn!(
                    target: "iconvault",
                    event = "icon_file_missing",
                    icon_id = icon.id,
                    operation = "category_delete",
                );
                self.reassign_record_only(icon, target).await
            }
            other => other,
        }
    }

    // Nothing to move, but the record must not keep pointing at a category
    // that is about to disappear.
    async fn reassign_record_only(&self, icon: &Icon, target: &Category) -> AppResult<Icon> {
        let mut filename = icon.filename.clone();
        let occupied = self.vault.icon_path(&target.name, &filename)?;
        if occupied.exists() {
            if let Some(name) = resolve_conflict_name(&occupied)?
                .file_name()
                .and_then(|name| name.to_str())
            {
                filename = name.to_string();
            }
        }

        let mut updated = icon.clone();
        updated.category_id = Some(target.id);
        updated.category_name = target.name.clone();
        updated.filename = filename;
        self.backend
            .update_icon(&updated)
            .await?
            .ok_or_else(|| AppError::not_found("icon", icon.id))
    }
}
