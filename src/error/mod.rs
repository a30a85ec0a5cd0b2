use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;

pub const ERR_NOT_FOUND: &str = "NOT_FOUND";
pub const ERR_CATEGORY_NOT_FOUND: &str = "CATEGORY_NOT_FOUND";
pub const ERR_DUPLICATE_NAME: &str = "DUPLICATE_NAME";
pub const ERR_IS_DEFAULT_CATEGORY: &str = "IS_DEFAULT_CATEGORY";
pub const ERR_INVALID_EXTENSION: &str = "INVALID_EXTENSION";
pub const ERR_FILE_MISSING: &str = "FILE_MISSING";
pub const ERR_PATH_TRAVERSAL: &str = "PATH_TRAVERSAL";
pub const ERR_FILENAME_INVALID: &str = "FILENAME_INVALID";
pub const ERR_NAME_TOO_LONG: &str = "NAME_TOO_LONG";
pub const ERR_BACKEND_UNAVAILABLE: &str = "BACKEND_UNAVAILABLE";

/// A structured application error that can be serialized and handed to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;
pub type Result<T> = AppResult<T>;

/// Typed classification of an [`AppError`] code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    CategoryNotFound,
    DuplicateName,
    IsDefaultCategory,
    InvalidExtension,
    FileMissing,
    PathTraversal,
    InvalidName,
    BackendUnavailable,
    Io,
    Storage,
}

impl ErrorKind {
    /// Domain failures describe the request, not the health of a backend.
    pub fn is_domain(self) -> bool {
        !matches!(
            self,
            ErrorKind::BackendUnavailable | ErrorKind::Io | ErrorKind::Storage
        )
    }
}

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        AppError::new(ERR_NOT_FOUND, format!("{entity} not found"))
            .with_context("entity", entity.to_string())
            .with_context("id", id.to_string())
    }

    pub fn category_not_found(id: i64) -> Self {
        AppError::new(ERR_CATEGORY_NOT_FOUND, "Category not found")
            .with_context("category_id", id.to_string())
    }

    pub fn duplicate_name(name: &str) -> Self {
        AppError::new(ERR_DUPLICATE_NAME, "An entry with this name already exists")
            .with_context("name", name.to_string())
    }

    pub fn default_category(name: &str) -> Self {
        AppError::new(
            ERR_IS_DEFAULT_CATEGORY,
            "The default category cannot be renamed or deleted",
        )
        .with_context("name", name.to_string())
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Classifies the error code into an [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            ERR_NOT_FOUND => ErrorKind::NotFound,
            ERR_CATEGORY_NOT_FOUND => ErrorKind::CategoryNotFound,
            ERR_DUPLICATE_NAME => ErrorKind::DuplicateName,
            ERR_IS_DEFAULT_CATEGORY => ErrorKind::IsDefaultCategory,
            ERR_INVALID_EXTENSION => ErrorKind::InvalidExtension,
            ERR_FILE_MISSING => ErrorKind::FileMissing,
            ERR_PATH_TRAVERSAL => ErrorKind::PathTraversal,
            ERR_FILENAME_INVALID | ERR_NAME_TOO_LONG => ErrorKind::InvalidName,
            ERR_BACKEND_UNAVAILABLE => ErrorKind::BackendUnavailable,
            code if code.starts_with("IO/") => ErrorKind::Io,
            _ => ErrorKind::Storage,
        }
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Extends the context map with additional key/value pairs.
    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::new("SQLX/IO", err.to_string())
                .with_context("io_kind", format!("{:?}", err.kind())),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
