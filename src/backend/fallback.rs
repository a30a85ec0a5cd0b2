use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use super::{BackendKind, MetadataBackend};
use crate::model::{Category, Icon, NewIcon};
use crate::{AppError, AppResult};

/// Attempt every call on `primary`; on a storage failure, repeat it on
/// `secondary`. Domain failures (not found, duplicates) are returned as-is.
/// Both failing surfaces the primary error.
pub struct FallbackBackend {
    primary: Arc<dyn MetadataBackend>,
    secondary: Arc<dyn MetadataBackend>,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn MetadataBackend>, secondary: Arc<dyn MetadataBackend>) -> Self {
        Self { primary, secondary }
    }

    async fn attempt<'f, T, F>(&'f self, operation: &'static str, call: F) -> AppResult<T>
    where
        F: Fn(&'f dyn MetadataBackend) -> BoxFuture<'f, AppResult<T>>,
    {
        let primary_err = match call(self.primary.as_ref()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind().is_domain() => return Err(err),
            Err(err) => err,
        };

        warn!(
            target: "iconvault",
            event = "backend_fallback",
            operation,
            from = %self.primary.kind(),
            to = %self.secondary.kind(),
            error = %primary_err,
        );

        call(self.secondary.as_ref())
            .await
            .map_err(|secondary_err| fallback_failed(primary_err, secondary_err, operation))
    }
}

fn fallback_failed(primary: AppError, secondary: AppError, operation: &str) -> AppError {
    warn!(
        target: "iconvault",
        event = "backend_fallback_failed",
        operation,
        error = %secondary,
    );
    primary
        .with_context("fallback_operation", operation.to_string())
        .with_context("fallback_error", secondary.to_string())
}

#[async_trait]
impl MetadataBackend for FallbackBackend {
    fn kind(&self) -> BackendKind {
        self.primary.kind()
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.attempt("list_categories", |b| b.list_categories()).await
    }

    async fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        self.attempt("get_category", |b| b.get_category(id)).await
    }

    async fn find_category_by_name(&self, name: &str) -> AppResult<Option<Category>> {
        self.attempt("find_category_by_name", |b| b.find_category_by_name(name))
            .await
    }

    async fn insert_category(&self, name: &str) -> AppResult<Category> {
        self.attempt("insert_category", |b| b.insert_category(name)).await
    }

    async fn rename_category(&self, id: i64, name: &str) -> AppResult<Option<Category>> {
        self.attempt("rename_category", |b| b.rename_category(id, name))
            .await
    }

    async fn delete_category(&self, id: i64) -> AppResult<bool> {
        self.attempt("delete_category", |b| b.delete_category(id)).await
    }

    async fn list_icons(&self, category_id: Option<i64>) -> AppResult<Vec<Icon>> {
        self.attempt("list_icons", |b| b.list_icons(category_id)).await
    }

    async fn get_icon(&self, id: i64) -> AppResult<Option<Icon>> {
        self.attempt("get_icon", |b| b.get_icon(id)).await
    }

    async fn insert_icon(&self, icon: NewIcon) -> AppResult<Icon> {
        self.attempt("insert_icon", |b| b.insert_icon(icon.clone()))
            .await
    }

    async fn update_icon(&self, icon: &Icon) -> AppResult<Option<Icon>> {
        self.attempt("update_icon", |b| b.update_icon(icon)).await
    }

    async fn delete_icon(&self, id: i64) -> AppResult<bool> {
        self.attempt("delete_icon", |b| b.delete_icon(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JsonBackend;
    use crate::error::ERR_DUPLICATE_NAME;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call with a storage error and counts attempts.
    struct Broken {
        calls: AtomicUsize,
    }

    impl Broken {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn fail<T>(&self) -> AppResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"))
        }
    }

    #[async_trait]
    impl MetadataBackend for Broken {
        fn kind(&self) -> BackendKind {
            BackendKind::Database
        }
        async fn list_categories(&self) -> AppResult<Vec<Category>> {
            self.fail()
        }
        async fn get_category(&self, _id: i64) -> AppResult<Option<Category>> {
            self.fail()
        }
        async fn find_category_by_name(&self, _name: &str) -> AppResult<Option<Category>> {
            self.fail()
        }
        async fn insert_category(&self, _name: &str) -> AppResult<Category> {
            self.fail()
        }
        async fn rename_category(&self, _id: i64, _name: &str) -> AppResult<Option<Category>> {
            self.fail()
        }
        async fn delete_category(&self, _id: i64) -> AppResult<bool> {
            self.fail()
        }
        async fn list_icons(&self, _category_id: Option<i64>) -> AppResult<Vec<Icon>> {
            self.fail()
        }
        async fn get_icon(&self, _id: i64) -> AppResult<Option<Icon>> {
            self.fail()
        }
        async fn insert_icon(&self, _icon: NewIcon) -> AppResult<Icon> {
            self.fail()
        }
        async fn update_icon(&self, _icon: &Icon) -> AppResult<Option<Icon>> {
            self.fail()
        }
        async fn delete_icon(&self, _id: i64) -> AppResult<bool> {
            self.fail()
        }
    }

    fn json(dir: &std::path::Path) -> Arc<JsonBackend> {
        Arc::new(JsonBackend::new(
            dir.join("categories.json"),
            dir.join("icons_metadata.json"),
        ))
    }

    #[tokio::test]
    async fn storage_failure_is_retried_on_secondary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secondary = json(dir.path());
        let backend = FallbackBackend::new(Arc::new(Broken::new()), secondary.clone());

        let created = backend.insert_category("Arrows").await.expect("fallback insert");
        assert_eq!(created.name, "Arrows");
        assert_eq!(
            secondary.list_categories().await.expect("list").len(),
            1
        );
        assert_eq!(backend.kind(), BackendKind::Database);
    }

    #[tokio::test]
    async fn domain_failure_is_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let primary = json(dir.path().join("a").as_path());
        let broken = Arc::new(Broken::new());
        primary.insert_category("Arrows").await.expect("seed");
        let backend = FallbackBackend::new(primary, broken.clone());

        let err = backend.insert_category("Arrows").await.expect_err("dup");
        assert_eq!(err.code(), ERR_DUPLICATE_NAME);
        assert_eq!(broken.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn both_failing_surfaces_primary_error() {
        let backend = FallbackBackend::new(Arc::new(Broken::new()), Arc::new(Broken::new()));
        let err = backend.list_icons(None).await.expect_err("both down");
        assert_eq!(err.code(), "SQLX/POOL_CLOSED");
        assert_eq!(
            err.context().get("fallback_operation").map(String::as_str),
            Some("list_icons")
        );
        assert!(err.context().contains_key("fallback_error"));
    }
}
