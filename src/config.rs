use std::path::{Path, PathBuf};

use serde::Serialize;

pub const ENV_STORAGE_ROOT: &str = "ICONVAULT_STORAGE_ROOT";
pub const ENV_DATA_DIR: &str = "ICONVAULT_DATA_DIR";
pub const ENV_DATABASE_URL: &str = "ICONVAULT_DATABASE_URL";
pub const ENV_USE_DATABASE: &str = "ICONVAULT_USE_DATABASE";
pub const ENV_LOG_DIR: &str = "ICONVAULT_LOG_DIR";
pub const ENV_DEFAULT_CATEGORY: &str = "ICONVAULT_DEFAULT_CATEGORY";

pub const DEFAULT_CATEGORY_NAME: &str = "未分类";
pub const CATEGORIES_FILE: &str = "categories.json";
pub const ICONS_FILE: &str = "icons_metadata.json";
const DATABASE_FILE: &str = "icons.sqlite3";

/// Process configuration, resolved once at startup and handed to
/// [`crate::Library::open`].
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub use_database: bool,
    pub log_dir: Option<PathBuf>,
    pub default_category: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let storage_root = get(ENV_STORAGE_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("icons"));
        let database_url = get(ENV_DATABASE_URL).unwrap_or_else(|| sqlite_url(&data_dir));
        let use_database = get(ENV_USE_DATABASE)
            .map(|value| parse_flag(&value))
            .unwrap_or(true);
        let log_dir = get(ENV_LOG_DIR).map(PathBuf::from);
        let default_category = get(ENV_DEFAULT_CATEGORY)
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_CATEGORY_NAME.to_string());

        Self {
            storage_root,
            data_dir,
            database_url,
            use_database,
            log_dir,
            default_category,
        }
    }

    /// Self-contained layout under one directory.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let data_dir = root.as_ref().join("data");
        Self {
            storage_root: root.as_ref().join("icons"),
            database_url: sqlite_url(&data_dir),
            data_dir,
            use_database: true,
            log_dir: None,
            default_category: DEFAULT_CATEGORY_NAME.to_string(),
        }
    }

    pub fn categories_file(&self) -> PathBuf {
        self.data_dir.join(CATEGORIES_FILE)
    }

    pub fn icons_file(&self) -> PathBuf {
        self.data_dir.join(ICONS_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("iconvault"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn sqlite_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join(DATABASE_FILE).display())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
