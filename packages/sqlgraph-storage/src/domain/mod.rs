//! Domain layer for node execution contexts
//!
//! # Domain Models
//!
//! - `DatabaseRef`: one database a token makes available for attaching
//! - `SessionState`: lifecycle of an execution context's connection
//! - `TableInfo` / `ColumnInfo`: schema introspection results
//! - `FileStamp`: modification times of a database file and its WAL companions
//!
//! These types carry no connection; the SQLite adapter lives in
//! `infrastructure::sqlite`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

// ═══════════════════════════════════════════════════════════════════════════
// Database references
// ═══════════════════════════════════════════════════════════════════════════

/// Reference to a database that can be attached under `alias`
///
/// For file databases `path` is a filesystem path. For in-memory databases
/// `path` is the shared-cache name; every connection that opens the same name
/// sees the same data for as long as one of them stays open.
///
/// # Examples
///
/// ```rust
/// use sqlgraph_storage::domain::DatabaseRef;
///
/// let r = DatabaseRef::file("data/a.db", "a");
/// assert_eq!(r.uri(), "file:data/a.db");
///
/// let m = DatabaseRef::memory("run1-s", "s");
/// assert_eq!(m.uri(), "file:run1-s?mode=memory&cache=shared");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub path: String,
    pub alias: String,
    pub in_memory: bool,
}

impl DatabaseRef {
    pub fn file(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            alias: alias.into(),
            in_memory: false,
        }
    }

    pub fn memory(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            path: name.into(),
            alias: alias.into(),
            in_memory: true,
        }
    }

    /// SQLite URI used both for opening and for ATTACH
    pub fn uri(&self) -> String {
        database_uri(&self.path, self.in_memory)
    }
}

/// Build the URI for a shared in-memory database or a file database
pub fn database_uri(path: &str, in_memory: bool) -> String {
    let escaped = escape_uri_path(path);
    if in_memory {
        format!("file:{}?mode=memory&cache=shared", escaped)
    } else {
        format!("file:{}", escaped)
    }
}

fn escape_uri_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3f"),
            '#' => out.push_str("%23"),
            _ => out.push(c),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// Session state
// ═══════════════════════════════════════════════════════════════════════════

/// Connection lifecycle: `Closed → Open → (Attached)* → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Destroyed, or never opened
    Closed,
    /// Connected, nothing attached
    Open,
    /// Connected with at least one sibling database attached
    Attached,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::Attached => "attached",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Schema introspection
// ═══════════════════════════════════════════════════════════════════════════

/// One column as reported by `pragma table_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    /// Default value expression, verbatim
    pub default_value: Option<String>,
}

/// One table of the main schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Staleness
// ═══════════════════════════════════════════════════════════════════════════

/// Modification times of a database file and its `-wal` / `-shm` companions
///
/// Two stamps compare equal when none of the three files changed, so a writer
/// that only touched the WAL is still detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStamp {
    pub file: Option<SystemTime>,
    pub wal: Option<SystemTime>,
    pub shm: Option<SystemTime>,
}

impl FileStamp {
    pub fn capture(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            file: modified(path),
            wal: modified(&companion(path, "-wal")),
            shm: modified(&companion(path, "-shm")),
        }
    }

    /// True when the main file does not exist
    pub fn is_missing(&self) -> bool {
        self.file.is_none()
    }
}

fn companion(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    s.into()
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
