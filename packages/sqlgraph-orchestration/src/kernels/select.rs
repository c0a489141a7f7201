use crate::error::{KernelError, KernelResult};
use crate::kernel::{Invocation, Kernel, KernelDef, Widget};
use crate::token::NodeData;
use sqlgraph_storage::{DatabaseRef, ExecutionContext};
use tracing::{debug, info, warn};

/// Table a select materializes into
pub const RESULT_TABLE: &str = "main.result";

/// Runs a query across every upstream database and keeps the result in a
/// shared in-memory database named after the node
///
/// The query either is a complete `CREATE ...` statement, run verbatim, or a
/// plain query that gets wrapped as `CREATE TABLE main.result AS <query>`.
/// Upstream databases are attached under their aliases for the duration of
/// the statement and detached afterwards. The result lives as long as the
/// node's execution context.
pub struct SelectKernel;

impl SelectKernel {
    pub fn definition() -> KernelDef {
        KernelDef::new("select", SelectKernel)
            .input("db", false)
            .output("db", false)
            .param("query", "", Widget::EditBox)
    }
}

/// Statement that materializes `query` into the node's database
pub fn materialize_statement(query: &str) -> String {
    let query = query.trim().trim_end_matches(';').trim_end();
    let is_create = query
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("create"))
        .unwrap_or(false);
    if is_create {
        query.to_string()
    } else {
        format!("CREATE TABLE {} AS {}", RESULT_TABLE, query)
    }
}

impl Kernel for SelectKernel {
    fn execute(&self, inputs: &[NodeData], call: &mut Invocation) -> KernelResult<Vec<NodeData>> {
        if inputs.is_empty() {
            return Err(KernelError::NoInputs);
        }
        let dbs: Vec<DatabaseRef> = inputs.iter().flat_map(|t| t.dbs.iter().cloned()).collect();
        if dbs.is_empty() {
            return Err(KernelError::NoDatabases);
        }
        let statement = materialize_statement(call.required_param("query")?);

        let name = call.memory_name();
        let node = call.node_name().to_string();
        let ctx = call.open_context(&name, true)?;

        let changed = match materialize(ctx, &dbs, &statement) {
            Ok(changed) => changed,
            Err(e) => {
                release_attached(ctx, &node);
                return Err(e);
            }
        };
        debug!(node = %node, statement = %statement, changed, "select materialized");

        for db in &dbs {
            ctx.detach(&db.alias).map_err(KernelError::Detach)?;
        }

        info!(node = %node, sources = dbs.len(), "select complete");
        Ok(vec![NodeData::single(DatabaseRef::memory(name, node))])
    }
}

fn materialize(ctx: &mut ExecutionContext, dbs: &[DatabaseRef], statement: &str) -> KernelResult<usize> {
    for db in dbs {
        ctx.attach_ref(db).map_err(KernelError::Attach)?;
    }
    // a reader may still hold the previous in-memory result open
    ctx.write_batch("DROP TABLE IF EXISTS main.result")
        .map_err(KernelError::Statement)?;
    let changed = ctx.write(statement, []).map_err(KernelError::Statement)?;
    ctx.commit()?;
    Ok(changed)
}

/// Best-effort detach of whatever a failed materialization left attached
fn release_attached(ctx: &mut ExecutionContext, node: &str) {
    let aliases: Vec<String> = ctx.attached().map(str::to_string).collect();
    for alias in aliases {
        if let Err(e) = ctx.detach(&alias) {
            warn!(node = %node, alias = %alias, error = %e, "detach after failed select");
        }
    }
}
