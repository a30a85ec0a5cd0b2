use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::error::{ERR_DUPLICATE_NAME, ERR_PATH_TRAVERSAL};
use crate::sanitize::{
    join_within, reject_symlinks, sanitize_relative_path, validate_component,
};
use crate::security::hash_path;
use crate::{AppError, AppResult};

/// Owner of the storage root. Every on-disk location an icon or category can
/// occupy is derived here, so nothing outside the root is ever touched.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    /// Create the storage root if needed and pin it to its canonical form.
    pub fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "vault_create_root")
                .with_context("path_hash", hash_path(&root))
        })?;
        let root = std::fs::canonicalize(&root).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "vault_canonicalize_root")
                .with_context("path_hash", hash_path(&root))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: &str) -> AppResult<PathBuf> {
        validate_component(category)
            .map_err(|err| err.with_context("category", category.to_string()))?;
        let dir = self.root.join(category);
        self.guard(&dir)?;
        Ok(dir)
    }

    pub fn icon_path(&self, category: &str, filename: &str) -> AppResult<PathBuf> {
        let dir = self.category_dir(category)?;
        // Stored names are already sanitized; anything else is a corrupt record.
        validate_component(filename)
            .map_err(|err| err.with_context("filename", filename.to_string()))?;
        let path = dir.join(filename);
        self.guard(&path)?;
        Ok(path)
    }

    /// Resolve a storage-relative `category/file` path for serving.
    pub fn resolve_relative(&self, relative: &str) -> AppResult<PathBuf> {
        let cleaned = sanitize_relative_path(relative)?;
        let full = join_within(&self.root, &cleaned)?;
        self.guard(&full)?;

        info!(
            target: "iconvault",
            event = "vault_guard",
            outcome = "allowed",
            relative_hash = %hash_path(Path::new(&cleaned)),
            path_hash = %hash_path(&full),
        );
        Ok(full)
    }

    pub async fn ensure_category_dir(&self, category: &str) -> AppResult<PathBuf> {
        let dir = self.category_dir(category)?;
        fs::create_dir_all(&dir).await.map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_category_dir")
                .with_context("category", category.to_string())
        })?;
        Ok(dir)
    }

    /// Returns `true` when a directory was actually renamed.
    pub async fn rename_category_dir(&self, from: &str, to: &str) -> AppResult<bool> {
        let source = self.category_dir(from)?;
        let target = self.category_dir(to)?;
        if fs::try_exists(&target).await.unwrap_or(false) {
            return Err(AppError::new(
                ERR_DUPLICATE_NAME,
                "A directory with that category name already exists.",
            )
            .with_context("name", to.to_string()));
        }
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(false);
        }
        fs::rename(&source, &target).await.map_err(|err| {
            AppError::from(err)
                .with_context("operation", "rename_category_dir")
                .with_context("from", from.to_string())
                .with_context("to", to.to_string())
        })?;
        Ok(true)
    }

    /// Best effort: a non-empty or locked directory is left in place.
    pub async fn remove_category_dir(&self, category: &str) {
        let dir = match self.category_dir(category) {
            Ok(dir) => dir,
            Err(_) => return,
        };
        if let Err(err) = fs::remove_dir(&dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    target: "iconvault",
                    event = "category_dir_cleanup_failed",
                    path_hash = %hash_path(&dir),
                    error = %err,
                );
            }
        }
    }

    fn guard(&self, path: &Path) -> AppResult<()> {
        if !path.starts_with(&self.root) {
            return Err(self.deny(path, "joined path escaped root"));
        }
        reject_symlinks(&self.root, path).map_err(|reason| self.deny(path, reason))
    }

    fn deny(&self, path: &Path, reason: &'static str) -> AppError {
        warn!(
            target: "iconvault",
            event = "vault_guard",
            outcome = "denied",
            reason,
            path_hash = %hash_path(path),
        );
        AppError::new(
            ERR_PATH_TRAVERSAL,
            "Path must stay inside the storage root.",
        )
        .with_context("reason", reason)
    }
}
