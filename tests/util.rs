#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::PathBuf;

use iconvault_lib::config::DEFAULT_CATEGORY_NAME;
use iconvault_lib::{AppConfig, BackendKind, Icon, IconUpload, Library};
use tempfile::TempDir;

pub const BACKENDS: [BackendKind; 2] = [BackendKind::Database, BackendKind::FileSystem];

pub struct Harness {
    pub dir: TempDir,
    pub library: Library,
}

impl Harness {
    pub fn file_of(&self, icon: &Icon) -> PathBuf {
        self.library
            .vault()
            .root()
            .join(&icon.category_name)
            .join(&icon.filename)
    }

    pub fn category_dir(&self, name: &str) -> PathBuf {
        self.library.vault().root().join(name)
    }

    pub async fn default_id(&self) -> i64 {
        self.library
            .categories()
            .default_category()
            .await
            .expect("default category")
            .id
    }

    /// Every record names a file that exists in the directory of the
    /// category it references, and the default category is present.
    pub async fn assert_consistent(&self) {
        let categories = self.library.categories().list().await.expect("categories");
        assert!(
            categories.iter().any(|c| c.name == DEFAULT_CATEGORY_NAME),
            "default category missing"
        );
        let icons = self.library.icons().list(None).await.expect("icons");
        for icon in &icons {
            let category = categories
                .iter()
                .find(|c| Some(c.id) == icon.category_id)
                .unwrap_or_else(|| panic!("icon {} has no category", icon.id));
            assert_eq!(icon.category_name, category.name, "icon {}", icon.id);
            assert!(
                self.file_of(icon).is_file(),
                "file for icon {} missing at {}",
                icon.id,
                icon.relative_path()
            );
        }
        let mut locations: Vec<_> = icons.iter().map(Icon::relative_path).collect();
        let total = locations.len();
        locations.sort();
        locations.dedup();
        assert_eq!(locations.len(), total, "two icons share a location");
    }
}

pub fn config_for(dir: &TempDir, kind: BackendKind) -> AppConfig {
    let mut config = AppConfig::for_root(dir.path());
    config.use_database = kind == BackendKind::Database;
    config
}

pub async fn harness(kind: BackendKind) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let library = Library::open(config_for(&dir, kind))
        .await
        .expect("open library");
    assert_eq!(library.backend_kind(), kind);
    Harness { dir, library }
}

/// A tiny payload that differs per name so overwrites are detectable.
pub fn upload(name: &str) -> IconUpload {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(name.as_bytes());
    IconUpload::new(name, bytes)
}
