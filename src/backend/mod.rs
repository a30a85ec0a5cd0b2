//! Metadata persistence. Two interchangeable implementations sit behind
//! [`MetadataBackend`]; [`select_backend`] picks one at startup.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::model::{Category, Icon, NewIcon};
use crate::AppResult;

mod fallback;
mod json;
mod selector;
mod sqlite;

pub use fallback::FallbackBackend;
pub use json::JsonBackend;
pub use selector::{probe_database, select_backend, ActiveBackend, ProbeError};
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Database,
    FileSystem,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Database => "database",
            BackendKind::FileSystem => "file_system",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category and icon records, without any filesystem side effects.
///
/// `Option`/`bool` returns signal absence; implementations reserve errors for
/// storage failures and uniqueness violations (`DUPLICATE_NAME`).
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn list_categories(&self) -> AppResult<Vec<Category>>;
    async fn get_category(&self, id: i64) -> AppResult<Option<Category>>;
    async fn find_category_by_name(&self, name: &str) -> AppResult<Option<Category>>;
    async fn insert_category(&self, name: &str) -> AppResult<Category>;
    /// Renames the category and rewrites `category_name` on its icons.
    async fn rename_category(&self, id: i64, name: &str) -> AppResult<Option<Category>>;
    async fn delete_category(&self, id: i64) -> AppResult<bool>;

    async fn list_icons(&self, category_id: Option<i64>) -> AppResult<Vec<Icon>>;
    async fn get_icon(&self, id: i64) -> AppResult<Option<Icon>>;
    async fn insert_icon(&self, icon: NewIcon) -> AppResult<Icon>;
    /// Persists every mutable field of `icon` and bumps `updated_at`.
    async fn update_icon(&self, icon: &Icon) -> AppResult<Option<Icon>>;
    async fn delete_icon(&self, id: i64) -> AppResult<bool>;
}
