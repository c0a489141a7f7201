//! sqlgraph-storage - per-node database sessions
//!
//! A node's output in sqlgraph is a reference to tables in an embedded SQLite
//! database. This crate owns everything that touches those databases:
//!
//! 1. **DatabaseRef**: the `{path, alias, in_memory}` triple carried by tokens
//! 2. **ExecutionContext**: one connection per node execution, with
//!    attach/detach of sibling databases under private aliases and a
//!    checkpoint-on-close lifecycle
//! 3. **Introspection**: table/column listing and file staleness stamps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sqlgraph_storage::{DatabaseRef, ExecutionContext};
//!
//! let mut ctx = ExecutionContext::open("scratch", true)?;
//! ctx.attach_ref(&DatabaseRef::file("databases/a.db", "a"))?;
//! ctx.write("CREATE TABLE main.result AS SELECT * FROM a.t1", [])?;
//! ctx.detach("a")?;
//! ctx.destroy()?;
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{database_uri, ColumnInfo, DatabaseRef, FileStamp, SessionState, TableInfo};

#[cfg(feature = "sqlite")]
pub use infrastructure::ExecutionContext;

/// Re-exported so callers can name row and parameter types
#[cfg(feature = "sqlite")]
pub use rusqlite;
