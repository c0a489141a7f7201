use crate::error::{KernelError, KernelResult};
use crate::kernel::{Invocation, Kernel, KernelDef, Widget};
use crate::token::NodeData;
use sqlgraph_storage::{DatabaseRef, StorageError};
use tracing::debug;

/// Source node: publishes one on-disk database under an alias
///
/// Parameters:
/// - `path`: database file, relative paths resolve against the database directory
/// - `alias`: schema name downstream nodes attach it as (defaults to the node name)
///
/// The file does not have to exist; attaching creates it.
pub struct FileKernel;

impl FileKernel {
    pub fn definition() -> KernelDef {
        KernelDef::new("file", FileKernel)
            .output("db", false)
            .param("path", "", Widget::EditBox)
            .param("alias", "", Widget::EditBox)
    }
}

impl Kernel for FileKernel {
    fn execute(&self, _inputs: &[NodeData], call: &mut Invocation) -> KernelResult<Vec<NodeData>> {
        let path = call.resolve_path(call.required_param("path")?);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| KernelError::Storage(StorageError::from(e)))?;
        }

        let alias = match call.param("alias").trim() {
            "" => call.node_name().to_string(),
            a => a.to_string(),
        };

        call.record_source(&path);
        debug!(node = %call.node_name(), path = %path.display(), alias = %alias, "file source");
        Ok(vec![NodeData::single(DatabaseRef::file(
            path.to_string_lossy(),
            alias,
        ))])
    }
}
