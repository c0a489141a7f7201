/*
 * sqlgraph-orchestration - dataflow engine over SQLite databases
 *
 * Users wire nodes into a graph; each node runs a kernel (file, merge,
 * select, or a registered one) on the database references produced by its
 * inputs. A generation re-runs only what changed since the last clean run.
 *
 * Architecture:
 * - Graph model and kernel registry (single owner, mutated through &mut)
 * - Generation scheduler (bounded blocking workers, cooperative interrupt)
 * - Execution contexts (one SQLite connection per node, sqlgraph-storage)
 * - JSON layout persistence, YAML engine config
 */

// Public modules
pub mod config;
pub mod dag;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod kernels;
pub mod logging;
pub mod node;
pub mod persist;
pub mod registry;
pub mod scheduler;
pub mod token;

// Re-exports
pub use config::EngineConfig;
pub use dag::{ensure_acyclic, find_cycle, parallel_levels};
pub use error::{EngineError, KernelError, KernelResult, NodeError, NodeErrorKind, Result};
pub use graph::Graph;
pub use kernel::{Invocation, Kernel, KernelDef, ParamSpec, Port, SourceStamp, Widget};
pub use kernels::{FileKernel, MergeKernel, SelectKernel};
pub use node::{Node, NodeInput, NodePhase};
pub use persist::{GraphDocument, NodeRecord};
pub use registry::Registry;
pub use scheduler::{GenerationReport, Scheduler};
pub use token::NodeData;

pub use sqlgraph_storage::{DatabaseRef, ExecutionContext, TableInfo};
