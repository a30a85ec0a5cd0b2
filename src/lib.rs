//! Icon asset library: categories map to directories under a storage root,
//! icon metadata lives in sqlite or, when that is unavailable, in JSON
//! documents.

pub mod backend;
pub mod categories;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod icons;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod sanitize;
pub mod security;
pub mod state;
pub mod time;
pub mod vault;

pub use backend::{BackendKind, MetadataBackend};
pub use categories::CategoryStore;
pub use config::AppConfig;
pub use error::{AppError, AppResult, ErrorKind};
pub use icons::IconStore;
pub use logging::{init_logging, init_logging_with};
pub use model::{Category, Icon, IconPatch, IconUpload};
pub use state::Library;
