//! SQLite adapter
//!
//! Every connection is opened with URI filenames enabled so that shared
//! in-memory databases (`file:<name>?mode=memory&cache=shared`) and plain
//! files go through the same ATTACH path.

mod context;

pub use context::ExecutionContext;
