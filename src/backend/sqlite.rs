use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{BackendKind, MetadataBackend};
use crate::model::{normalize_tags, Category, Icon, NewIcon};
use crate::time::{now_ms, to_date};
use crate::{AppError, AppResult};

const CATEGORY_COLUMNS: &str = "id, name, created_at, updated_at";
const ICON_COLUMNS: &str = "id, filename, original_filename, category_id, category_name, tags, \
                            description, is_favorite, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl TryFrom<&SqliteRow> for Category {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            created_at: to_date(row.try_get("created_at").map_err(AppError::from)?),
            updated_at: to_date(row.try_get("updated_at").map_err(AppError::from)?),
        })
    }
}

impl TryFrom<&SqliteRow> for Icon {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let raw_tags: String = row.try_get("tags").map_err(AppError::from)?;
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            filename: row.try_get("filename").map_err(AppError::from)?,
            original_filename: row.try_get("original_filename").map_err(AppError::from)?,
            category_id: row
                .try_get::<Option<i64>, _>("category_id")
                .map_err(AppError::from)?,
            category_name: row.try_get("category_name").map_err(AppError::from)?,
            tags: decode_tags(&raw_tags),
            description: row
                .try_get::<Option<String>, _>("description")
                .map_err(AppError::from)?,
            is_favorite: row
                .try_get::<i64, _>("is_favorite")
                .map(|value| value != 0)
                .map_err(AppError::from)?,
            created_at: to_date(row.try_get("created_at").map_err(AppError::from)?),
            updated_at: to_date(row.try_get("updated_at").map_err(AppError::from)?),
        })
    }
}

// Older rows may hold a comma-separated list instead of a JSON array.
fn decode_tags(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(tags) => tags,
        Err(_) => normalize_tags(raw.split(',')),
    }
}

fn encode_tags(tags: &[String]) -> AppResult<String> {
    Ok(serde_json::to_string(tags)?)
}

fn map_unique(err: sqlx::Error, name: &str) -> AppError {
    let unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique {
        AppError::duplicate_name(name).with_cause(AppError::from(err))
    } else {
        AppError::from(err)
    }
}

#[async_trait]
impl MetadataBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let rows = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "list_categories"))?;
        rows.iter().map(Category::try_from).collect()
    }

    async fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "get_category"))?;
        row.as_ref().map(Category::try_from).transpose()
    }

    async fn find_category_by_name(&self, name: &str) -> AppResult<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "find_category"))?;
        row.as_ref().map(Category::try_from).transpose()
    }

    async fn insert_category(&self, name: &str) -> AppResult<Category> {
        let now = now_ms();
        let row = sqlx::query(&format!(
            "INSERT INTO categories (name, created_at, updated_at) VALUES (?1, ?2, ?2) \
             RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique(err, name).with_context("operation", "insert_category"))?;
        Category::try_from(&row)
    }

    async fn rename_category(&self, id: i64, name: &str) -> AppResult<Option<Category>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "rename_category_begin"))?;

        let updated = sqlx::query("UPDATE categories SET name = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(name)
            .bind(now_ms())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_unique(err, name).with_context("operation", "rename_category"))?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query("UPDATE icons SET category_name = ?1 WHERE category_id = ?2")
            .bind(name)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                AppError::from(err).with_context("operation", "rename_category_icons")
            })?;

        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let category = Category::try_from(&row)?;

        tx.commit()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "rename_category_commit"))?;
        Ok(Some(category))
    }

    async fn delete_category(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "delete_category"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_icons(&self, category_id: Option<i64>) -> AppResult<Vec<Icon>> {
        let rows = match category_id {
            Some(category_id) => {
                sqlx::query(&format!(
                    "SELECT {ICON_COLUMNS} FROM icons WHERE category_id = ?1 ORDER BY id"
                ))
                .bind(category_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {ICON_COLUMNS} FROM icons ORDER BY id"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|err| AppError::from(err).with_context("operation", "list_icons"))?;
        rows.iter().map(Icon::try_from).collect()
    }

    async fn get_icon(&self, id: i64) -> AppResult<Option<Icon>> {
        let row = sqlx::query(&format!("SELECT {ICON_COLUMNS} FROM icons WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "get_icon"))?;
        row.as_ref().map(Icon::try_from).transpose()
    }

    async fn insert_icon(&self, icon: NewIcon) -> AppResult<Icon> {
        let now = now_ms();
        let tags = encode_tags(&normalize_tags(&icon.tags))?;
        let row = sqlx::query(&format!(
            "INSERT INTO icons (filename, original_filename, category_id, category_name, tags, \
             description, is_favorite, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7) RETURNING {ICON_COLUMNS}"
        ))
        .bind(&icon.filename)
        .bind(&icon.original_filename)
        .bind(icon.category_id)
        .bind(&icon.category_name)
        .bind(tags)
        .bind(&icon.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            map_unique(err, &icon.filename)
                .with_context("operation", "insert_icon")
                .with_context("category", icon.category_name.clone())
        })?;
        Icon::try_from(&row)
    }

    async fn update_icon(&self, icon: &Icon) -> AppResult<Option<Icon>> {
        let tags = encode_tags(&normalize_tags(&icon.tags))?;
        let row = sqlx::query(&format!(
            "UPDATE icons SET filename = ?1, category_id = ?2, category_name = ?3, tags = ?4, \
             description = ?5, is_favorite = ?6, updated_at = ?7 WHERE id = ?8 \
             RETURNING {ICON_COLUMNS}"
        ))
        .bind(&icon.filename)
        .bind(icon.category_id)
        .bind(&icon.category_name)
        .bind(tags)
        .bind(&icon.description)
        .bind(i64::from(icon.is_favorite))
        .bind(now_ms())
        .bind(icon.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| {
            map_unique(err, &icon.filename)
                .with_context("operation", "update_icon")
                .with_context("icon_id", icon.id.to_string())
        })?;
        row.as_ref().map(Icon::try_from).transpose()
    }

    async fn delete_icon(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM icons WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "delete_icon"))?;
        Ok(result.rows_affected() > 0)
    }
}
