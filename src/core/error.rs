/// Error Module
///
/// This module defines the error type shared by every layer of dbport: the
/// result cursor, prepared statements, the datatype subsystem and the drivers.
/// Each variant corresponds to one failure category a caller may want to match on.
use thiserror::Error;

/// Comprehensive error type for dbport.
///
/// The first four variants are the portability-layer conditions:
/// - `NeedMoreData`: an operation touched a result that was already freed
/// - `NotFound`: a required placeholder or column is missing
/// - `Driver`: an opaque native call failed (bind, execute, free, column count)
/// - `AlreadyFreed`: an operation touched a prepared statement that was freed
///
/// The rest cover the ambient concerns around them.
#[derive(Error, Debug)]
pub enum DbError {
    /// Operation attempted on an already-freed or exhausted result
    #[error("Need more data: {0}")]
    NeedMoreData(String),

    /// Missing bound placeholder or undefined result column
    #[error("Not found: {0}")]
    NotFound(String),

    /// Native driver call failed
    #[error("Driver error: {0}")]
    Driver(String),

    /// Operation attempted on a prepared statement that was already freed
    #[error("Already freed: {0}")]
    AlreadyFreed(String),

    /// No live connection is available
    #[error("Connection error: {0}")]
    Connection(String),

    /// A field could not be coerced to its declared logical type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Errors raised by the bundled SQLite driver
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system and stream I/O errors (large-object sources)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors while materializing records
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic application errors for unexpected conditions
    #[error("Application error: {0}")]
    App(String),
}

/// Coarse classification of a [`DbError`], for callers that only care about
/// the category of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NeedMoreData,
    NotFound,
    Driver,
    AlreadyFreed,
    Connection,
    Conversion,
    Io,
    Config,
    App,
}

impl DbError {
    /// Returns the category of this error.
    ///
    /// SQLite errors count as driver failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NeedMoreData(_) => ErrorKind::NeedMoreData,
            DbError::NotFound(_) => ErrorKind::NotFound,
            DbError::Driver(_) | DbError::Database(_) => ErrorKind::Driver,
            DbError::AlreadyFreed(_) => ErrorKind::AlreadyFreed,
            DbError::Connection(_) => ErrorKind::Connection,
            DbError::Conversion(_) | DbError::Json(_) => ErrorKind::Conversion,
            DbError::Io(_) => ErrorKind::Io,
            DbError::Config(_) => ErrorKind::Config,
            DbError::App(_) => ErrorKind::App,
        }
    }

    pub(crate) fn result_freed() -> Self {
        DbError::NeedMoreData("resultset has already been freed".to_string())
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;
