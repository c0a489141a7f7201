// Built-in kernels
pub mod file;
pub mod merge;
pub mod select;

// Re-exports
pub use file::FileKernel;
pub use merge::MergeKernel;
pub use select::{materialize_statement, SelectKernel, RESULT_TABLE};

use crate::registry::Registry;
use tracing::warn;

/// Register `file`, `merge` and `select`; names already taken are skipped
pub fn register_builtins(registry: &mut Registry) {
    for def in [
        FileKernel::definition(),
        MergeKernel::definition(),
        SelectKernel::definition(),
    ] {
        if let Err(e) = registry.register(def) {
            warn!(error = %e, "built-in kernel not registered");
        }
    }
}
