use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Category record. The name doubles as the directory name under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub original_filename: String,
    pub category_id: Option<i64>,
    pub category_name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "nullable_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl Icon {
    /// `<category_name>/<filename>`, relative to the storage root.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.category_name, self.filename)
    }

    pub fn url_path(&self) -> String {
        format!("icons/{}", self.relative_path())
    }
}

/// Insert payload; the backend assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewIcon {
    pub filename: String,
    pub original_filename: String,
    pub category_id: i64,
    pub category_name: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IconPatch {
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub is_favorite: Option<bool>,
}

impl IconPatch {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.description.is_none() && self.is_favorite.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct IconUpload {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl IconUpload {
    pub fn new(original_filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            original_filename: original_filename.into(),
            tags: Vec::new(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IconFile {
    pub filename: String,
    pub mime: &'static str,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    #[serde(flatten)]
    pub category: Category,
    pub icon_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IconDeleted {
    pub id: i64,
    /// False when the record was removed but the file could not be.
    pub file_removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub original_filename: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchUploadReport {
    pub uploaded: Vec<Icon>,
    pub failed: Vec<BatchFailure>,
}

/// Trimmed, de-duplicated and sorted; tag order carries no meaning.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn nullable_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
