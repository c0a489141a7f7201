//! Error types for sqlgraph-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Statement or connection errors reported by SQLite
    Database,
    /// ATTACH DATABASE failed
    Attach,
    /// DETACH DATABASE failed
    Detach,
    /// WAL checkpoint on close failed
    Checkpoint,
    /// Alias cannot be used as a schema name
    InvalidAlias,
    /// Operation on a context that was already destroyed
    Closed,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Attach => "attach",
            ErrorKind::Detach => "detach",
            ErrorKind::Checkpoint => "checkpoint",
            ErrorKind::InvalidAlias => "invalid_alias",
            ErrorKind::Closed => "closed",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn attach(alias: &str, path: &str) -> Self {
        Self::new(
            ErrorKind::Attach,
            format!("ATTACH '{}' AS \"{}\" failed", path, alias),
        )
    }

    pub fn detach(alias: &str) -> Self {
        Self::new(ErrorKind::Detach, format!("DETACH \"{}\" failed", alias))
    }

    pub fn checkpoint(path: &str) -> Self {
        Self::new(
            ErrorKind::Checkpoint,
            format!("wal_checkpoint on '{}' failed", path),
        )
    }

    pub fn invalid_alias(alias: &str, reason: &str) -> Self {
        Self::new(
            ErrorKind::InvalidAlias,
            format!("alias \"{}\" {}", alias, reason),
        )
    }

    pub fn closed(path: &str) -> Self {
        Self::new(
            ErrorKind::Closed,
            format!("context for '{}' is closed", path),
        )
    }

    /// Wrap a failing statement, keeping the query text in the message
    #[cfg(feature = "sqlite")]
    pub fn query(query: &str, err: rusqlite::Error) -> Self {
        Self::database(format!("query({}) failed: {}", query, err)).with_source(err)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = StorageError::detach("a");
        let msg = format!("{}", err);
        assert_eq!(msg, "[detach] DETACH \"a\" failed");
    }

    #[test]
    fn test_attach_error_names_path_and_alias() {
        let err = StorageError::attach("src", "/tmp/a.db");
        assert_eq!(err.kind, ErrorKind::Attach);
        assert!(err.message.contains("/tmp/a.db"));
        assert!(err.message.contains("\"src\""));
    }

    #[test]
    fn test_closed_error() {
        let err = StorageError::closed("mem");
        assert_eq!(err.kind, ErrorKind::Closed);
        assert_eq!(format!("{}", err), "[closed] context for 'mem' is closed");
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StorageError::checkpoint("a.db").with_source(io_err);

        assert_eq!(err.kind, ErrorKind::Checkpoint);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Database.as_str(), "database");
        assert_eq!(ErrorKind::Attach.as_str(), "attach");
        assert_eq!(ErrorKind::Detach.as_str(), "detach");
        assert_eq!(ErrorKind::Checkpoint.as_str(), "checkpoint");
        assert_eq!(ErrorKind::InvalidAlias.as_str(), "invalid_alias");
        assert_eq!(ErrorKind::Closed.as_str(), "closed");
        assert_eq!(ErrorKind::IO.as_str(), "io");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_from_rusqlite_error() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.message.contains("SQLite error"));
        assert!(err.source.is_some());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_query_error_keeps_query_text() {
        let err = StorageError::query("SELECT nope", rusqlite::Error::InvalidQuery);
        assert!(err.message.contains("query(SELECT nope) failed"));
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(StorageError::invalid_alias("main", "is reserved"))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidAlias);
    }
}
