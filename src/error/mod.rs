use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::Path;

use anyhow::Error as AnyhowError;
use csv::Error as CsvError;
use rusqlite::Error as SqliteError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;

/// A structured ledger error that can be serialized and surfaced to the UI.
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

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";
    /// A mutation addressed a record that does not exist.
    pub const NOT_FOUND_CODE: &'static str = "LEDGER/NOT_FOUND";

    /// Construct a new error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::new(Self::NOT_FOUND_CODE, message)
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

    pub fn is_not_found(&self) -> bool {
        self.code == Self::NOT_FOUND_CODE
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Shorthand for the `operation` + `path` pair every I/O failure carries.
    pub fn at(self, operation: &str, path: &Path) -> Self {
        self.with_context("operation", operation)
            .with_context("path", path.display().to_string())
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
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            write!(f, "[{}] {} ({:?})", self.code, self.message, pairs)
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

impl From<SqliteError> for AppError {
    fn from(error: SqliteError) -> Self {
        match error {
            SqliteError::QueryReturnedNoRows => {
                AppError::new("SQLITE/NO_ROWS", "Record not found")
            }
            SqliteError::SqliteFailure(inner, message) => {
                let code = format!("SQLITE/{:?}", inner.code);
                let text = message.unwrap_or_else(|| inner.to_string());
                AppError::new(code, text)
                    .with_context("extended_code", inner.extended_code.to_string())
            }
            SqliteError::InvalidColumnName(name) => {
                AppError::new("SQLITE/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqliteError::FromSqlConversionFailure(index, kind, source) => {
                AppError::new("SQLITE/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
                    .with_context("column_type", kind.to_string())
            }
            other => AppError::new("SQLITE/ERROR", other.to_string()),
        }
    }
}

impl From<CsvError> for AppError {
    fn from(error: CsvError) -> Self {
        let position = error.position().cloned();
        let code = match error.kind() {
            csv::ErrorKind::Io(_) => "CSV/IO",
            csv::ErrorKind::Utf8 { .. } => "CSV/UTF8",
            csv::ErrorKind::UnequalLengths { .. } => "CSV/UNEQUAL_LENGTHS",
            _ => "CSV/ERROR",
        };
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(pos) = position {
            app_error = app_error
                .with_context("line", pos.line().to_string())
                .with_context("record", pos.record().to_string());
        }
        app_error
    }
}
