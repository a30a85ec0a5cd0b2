use std::path::Path;
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::backend::MetadataBackend;
use crate::coordinator::{move_icon, Destination};
use crate::error::{ERR_FILENAME_INVALID, ERR_FILE_MISSING, ERR_INVALID_EXTENSION};
use crate::model::{
    normalize_tags, BatchFailure, BatchUploadReport, Icon, IconDeleted, IconFile, IconPatch,
    IconUpload, NewIcon,
};
use crate::sanitize::{allowed_extension, generated_icon_name, sanitize_filename, split_name};
use crate::security::hash_path;
use crate::vault::Vault;
use crate::{AppError, AppResult};

const WRITE_ATTEMPTS: usize = 3;

/// MIME type served for a stored file, by extension.
pub fn mime_for(filename: &str) -> &'static str {
    let ext = split_name(filename)
        .1
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Icon records and the files they name. Every mutation that changes a
/// file location goes through the coordinator.
#[derive(Clone)]
pub struct IconStore {
    backend: Arc<dyn MetadataBackend>,
    vault: Arc<Vault>,
}

impl IconStore {
    pub fn new(backend: Arc<dyn MetadataBackend>, vault: Arc<Vault>) -> Self {
        Self { backend, vault }
    }

    pub async fn list(&self, category_id: Option<i64>) -> AppResult<Vec<Icon>> {
        self.backend.list_icons(category_id).await
    }

    pub async fn get(&self, id: i64) -> AppResult<Icon> {
        self.backend
            .get_icon(id)
            .await?
            .ok_or_else(|| AppError::not_found("icon", id))
    }

    /// Store an uploaded file under a generated name, then record it. The
    /// uploaded name is kept for display only.
    pub async fn create(&self, upload: IconUpload, category_id: i64) -> AppResult<Icon> {
        if upload.original_filename.trim().is_empty() {
            return Err(AppError::new(
                ERR_INVALID_EXTENSION,
                "Uploaded file has no name.",
            ));
        }
        let ext = allowed_extension(&upload.original_filename)?;
        let category = self
            .backend
            .get_category(category_id)
            .await?
            .ok_or_else(|| AppError::category_not_found(category_id))?;
        self.vault.ensure_category_dir(&category.name).await?;

        let (filename, path) = self.write_new_file(&category.name, &ext, &upload.bytes).await?;

        let record = NewIcon {
            filename,
            original_filename: upload.original_filename,
            category_id: category.id,
            category_name: category.name,
            tags: normalize_tags(&upload.tags),
            description: upload.description,
        };
        match self.backend.insert_icon(record).await {
            Ok(icon) => {
                info!(
                    target: "iconvault",
                    event = "icon_created",
                    icon_id = icon.id,
                    category_id = category_id,
                    size = upload.bytes.len(),
                );
                Ok(icon)
            }
            Err(err) => {
                // No record, so the file must not linger either.
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!(
                        target: "iconvault",
                        event = "icon_upload_cleanup_failed",
                        path_hash = %hash_path(&path),
                        error = %cleanup,
                    );
                }
                Err(err)
            }
        }
    }

    /// Upload many files into one category. Per-file failures are reported
    /// in the result rather than aborting the batch; only a missing
    /// category fails the whole call.
    pub async fn create_batch(
        &self,
        uploads: Vec<IconUpload>,
        category_id: i64,
    ) -> AppResult<BatchUploadReport> {
        if self.backend.get_category(category_id).await?.is_none() {
            return Err(AppError::category_not_found(category_id));
        }
        let mut report = BatchUploadReport::default();
        for upload in uploads {
            let original_filename = upload.original_filename.clone();
            match self.create(upload, category_id).await {
                Ok(icon) => report.uploaded.push(icon),
                Err(err) => report.failed.push(BatchFailure {
                    original_filename,
                    code: err.code().to_string(),
                    message: err.message().to_string(),
                }),
            }
        }
        info!(
            target: "iconvault",
            event = "icon_batch_uploaded",
            category_id,
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
        );
        Ok(report)
    }

    pub async fn update_metadata(&self, id: i64, patch: IconPatch) -> AppResult<Icon> {
        let mut icon = self.get(id).await?;
        if patch.is_empty() {
            return Ok(icon);
        }
        if let Some(tags) = patch.tags {
            icon.tags = normalize_tags(tags);
        }
        if let Some(description) = patch.description {
            let trimmed = description.trim();
            icon.description = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Some(is_favorite) = patch.is_favorite {
            icon.is_favorite = is_favorite;
        }
        self.backend
            .update_icon(&icon)
            .await?
            .ok_or_else(|| AppError::not_found("icon", id))
    }

    /// Give the stored file a new name inside its current category. The
    /// existing extension is kept.
    pub async fn rename(&self, id: i64, new_name: &str) -> AppResult<Icon> {
        let icon = self.get(id).await?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(AppError::new(
                ERR_FILENAME_INVALID,
                "New icon name cannot be empty.",
            ));
        }
        let desired = rename_target(new_name, &icon.filename);
        let dest = Destination {
            category_id: icon.category_id,
            category_name: &icon.category_name,
            filename: &desired,
        };
        let renamed = move_icon(self.backend.as_ref(), &self.vault, &icon, dest).await?;
        info!(target: "iconvault", event = "icon_renamed", icon_id = id);
        Ok(renamed)
    }

    /// Move the icon into another category. Same category is a no-op.
    pub async fn recategorize(&self, id: i64, category_id: i64) -> AppResult<Icon> {
        let icon = self.get(id).await?;
        if icon.category_id == Some(category_id) {
            return Ok(icon);
        }
        let category = self
            .backend
            .get_category(category_id)
            .await?
            .ok_or_else(|| AppError::category_not_found(category_id))?;
        self.vault.ensure_category_dir(&category.name).await?;

        let dest = Destination {
            category_id: Some(category.id),
            category_name: &category.name,
            filename: &icon.filename,
        };
        let moved = move_icon(self.backend.as_ref(), &self.vault, &icon, dest).await?;
        info!(
            target: "iconvault",
            event = "icon_recategorized",
            icon_id = id,
            category_id,
            renamed = moved.filename != icon.filename,
        );
        Ok(moved)
    }

    /// Remove the record, then the file. A file that cannot be removed is
    /// reported in the result; the record stays deleted.
    pub async fn delete(&self, id: i64) -> AppResult<IconDeleted> {
        let icon = self.get(id).await?;
        if !self.backend.delete_icon(id).await? {
            return Err(AppError::not_found("icon", id));
        }

        let file_removed = match self.vault.icon_path(&icon.category_name, &icon.filename) {
            Ok(path) => match fs::remove_file(&path).await {
                Ok(()) => true,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
                Err(err) => {
                    warn!(
                        target: "iconvault",
                        event = "icon_file_leaked",
                        icon_id = id,
                        path_hash = %hash_path(&path),
                        error = %err,
                    );
                    false
                }
            },
            Err(err) => {
                warn!(
                    target: "iconvault",
                    event = "icon_file_leaked",
                    icon_id = id,
                    error = %err,
                );
                false
            }
        };

        info!(target: "iconvault", event = "icon_deleted", icon_id = id, file_removed);
        Ok(IconDeleted { id, file_removed })
    }

    /// Bytes and MIME type for an icon id.
    pub async fn read(&self, id: i64) -> AppResult<IconFile> {
        let icon = self.get(id).await?;
        let path = self.vault.icon_path(&icon.category_name, &icon.filename)?;
        read_file(&path, &icon.filename).await
    }

    /// Bytes for a storage-relative `category/file` path.
    pub async fn read_by_path(&self, relative: &str) -> AppResult<IconFile> {
        let path = self.vault.resolve_relative(relative)?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        read_file(&path, &filename).await
    }

    async fn write_new_file(
        &self,
        category: &str,
        ext: &str,
        bytes: &[u8],
    ) -> AppResult<(String, std::path::PathBuf)> {
        let mut last_err = None;
        for _ in 0..WRITE_ATTEMPTS {
            let filename = sanitize_filename(&generated_icon_name(ext));
            let path = self.vault.icon_path(category, &filename)?;
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => {
                    return Err(AppError::from(err).with_context("operation", "icon_create_file"))
                }
            };

            let written = async {
                file.write_all(bytes).await?;
                file.sync_all().await
            }
            .await;
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(AppError::from(err).with_context("operation", "icon_write_file"));
            }
            return Ok((filename, path));
        }

        Err(last_err
            .map(AppError::from)
            .unwrap_or_else(|| AppError::new("IO/AlreadyExists", "Could not reserve a filename."))
            .with_context("operation", "icon_create_file"))
    }
}

// `name` with the stored file's extension; a matching extension typed by the
// user is not doubled.
fn rename_target(name: &str, current: &str) -> String {
    let cleaned = sanitize_filename(name);
    let Some(ext) = split_name(current).1.map(str::to_ascii_lowercase) else {
        return cleaned;
    };
    let stem = match split_name(&cleaned) {
        (stem, Some(typed)) if typed.eq_ignore_ascii_case(&ext) => stem.to_string(),
        _ => cleaned.clone(),
    };
    format!("{stem}.{ext}")
}

async fn read_file(path: &Path, filename: &str) -> AppResult<IconFile> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::new(
                ERR_FILE_MISSING,
                "Icon file could not be found in storage.",
            )
            .with_context("path_hash", hash_path(path)))
        }
        Err(err) => return Err(AppError::from(err).with_context("operation", "icon_read")),
    };
    Ok(IconFile {
        filename: filename.to_string(),
        mime: mime_for(filename),
        size: bytes.len() as u64,
        bytes,
    })
}
