use crate::error::{KernelError, KernelResult};
use crate::token::NodeData;
use serde::{Deserialize, Serialize};
use sqlgraph_storage::{ExecutionContext, FileStamp};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Declared input or output slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    /// Carries structured data rather than a plain value
    pub structured: bool,
}

impl Port {
    pub fn new(name: impl Into<String>, structured: bool) -> Self {
        Self {
            name: name.into(),
            structured,
        }
    }
}

/// Editor widget a parameter is presented with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Widget {
    EditBox,
    Slider,
    Switch,
    Checkbox,
}

/// Declared parameter: its default and how an editor shows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub key: String,
    pub default: String,
    pub widget: Widget,
}

/// Kernel body (pluggable node behavior)
///
/// `inputs` are index-aligned with the node's input slots. The returned list
/// becomes the node's outputs; entries beyond the declared outputs are kept,
/// missing ones read as zero-value tokens.
pub trait Kernel: Send + Sync {
    fn execute(&self, inputs: &[NodeData], call: &mut Invocation) -> KernelResult<Vec<NodeData>>;
}

impl<F> Kernel for F
where
    F: Fn(&[NodeData], &mut Invocation) -> KernelResult<Vec<NodeData>> + Send + Sync,
{
    fn execute(&self, inputs: &[NodeData], call: &mut Invocation) -> KernelResult<Vec<NodeData>> {
        self(inputs, call)
    }
}

/// Named kernel definition: ports, parameters and the body
#[derive(Clone)]
pub struct KernelDef {
    name: String,
    kernel: Arc<dyn Kernel>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    unbounded_inputs: bool,
    params: Vec<ParamSpec>,
}

impl KernelDef {
    pub fn new(name: impl Into<String>, kernel: impl Kernel + 'static) -> Self {
        Self {
            name: name.into(),
            kernel: Arc::new(kernel),
            inputs: Vec::new(),
            outputs: Vec::new(),
            unbounded_inputs: false,
            params: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, structured: bool) -> Self {
        self.inputs.push(Port::new(name, structured));
        self
    }

    pub fn output(mut self, name: impl Into<String>, structured: bool) -> Self {
        self.outputs.push(Port::new(name, structured));
        self
    }

    /// Allow any number of input slots; declared inputs become the template
    pub fn unbounded_inputs(mut self) -> Self {
        self.unbounded_inputs = true;
        self
    }

    pub fn param(mut self, key: impl Into<String>, default: impl Into<String>, widget: Widget) -> Self {
        self.params.push(ParamSpec {
            key: key.into(),
            default: default.into(),
            widget,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn has_unbounded_inputs(&self) -> bool {
        self.unbounded_inputs
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Parameter map a fresh node starts with
    pub fn default_parameters(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|p| (p.key.clone(), p.default.clone()))
            .collect()
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }
}

impl std::fmt::Debug for KernelDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelDef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("unbounded_inputs", &self.unbounded_inputs)
            .field("params", &self.params)
            .finish()
    }
}

/// Source file a node read from, with the stamp taken at execution time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStamp {
    pub path: PathBuf,
    pub stamp: FileStamp,
}

impl SourceStamp {
    pub fn capture(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::capture(&path);
        Self { path, stamp }
    }

    /// True when the file (or its WAL companions) changed since capture
    pub fn is_stale(&self) -> bool {
        FileStamp::capture(&self.path) != self.stamp
    }
}

/// Everything a kernel body may touch besides its inputs
///
/// Owned by the worker for the duration of one execution. A context opened
/// here is handed back to the node when the kernel returns, successful or not.
pub struct Invocation {
    node_name: String,
    parameters: BTreeMap<String, String>,
    database_dir: PathBuf,
    memory_namespace: String,
    context: Option<ExecutionContext>,
    source: Option<SourceStamp>,
}

impl Invocation {
    pub fn new(
        node_name: impl Into<String>,
        parameters: BTreeMap<String, String>,
        database_dir: impl Into<PathBuf>,
        memory_namespace: impl Into<String>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            parameters,
            database_dir: database_dir.into(),
            memory_namespace: memory_namespace.into(),
            context: None,
            source: None,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Parameter value, empty when unset
    pub fn param(&self, key: &str) -> &str {
        self.parameters.get(key).map(String::as_str).unwrap_or("")
    }

    /// Trimmed parameter value, or `MissingParameter` when blank
    pub fn required_param(&self, key: &'static str) -> KernelResult<&str> {
        let value = self.param(key).trim();
        if value.is_empty() {
            return Err(KernelError::MissingParameter(key));
        }
        Ok(value)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    /// Relative paths resolve against the database directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.database_dir.join(p)
        }
    }

    /// Shared-cache name of this node's in-memory result database
    pub fn memory_name(&self) -> String {
        format!("{}-{}", self.memory_namespace, self.node_name)
    }

    /// Open this node's execution context, replacing one opened earlier in
    /// the same execution
    pub fn open_context(&mut self, path: &str, in_memory: bool) -> KernelResult<&mut ExecutionContext> {
        if let Some(old) = self.context.take() {
            if let Err(e) = old.destroy() {
                warn!(node = %self.node_name, error = %e, "failed to close replaced context");
            }
        }
        let ctx = ExecutionContext::open(path, in_memory)?;
        Ok(self.context.insert(ctx))
    }

    pub fn context_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.context.as_mut()
    }

    pub fn record_source(&mut self, path: impl Into<PathBuf>) {
        self.source = Some(SourceStamp::capture(path));
    }

    pub(crate) fn into_parts(self) -> (Option<ExecutionContext>, Option<SourceStamp>) {
        (self.context, self.source)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("node_name", &self.node_name)
            .field("parameters", &self.parameters)
            .field("database_dir", &self.database_dir)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
