use crate::error::NodeError;
use crate::kernel::{KernelDef, SourceStamp};
use crate::token::NodeData;
use serde::{Deserialize, Serialize};
use sqlgraph_storage::ExecutionContext;
use std::collections::BTreeMap;

/// Reference from an input slot to an upstream node's output
///
/// An empty `node` means the slot is not connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInput {
    pub node: String,
    pub output: usize,
}

impl NodeInput {
    pub fn new(node: impl Into<String>, output: usize) -> Self {
        Self {
            node: node.into(),
            output,
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.node.is_empty()
    }
}

/// Where a node stands in the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Pending,
    Running,
    Done,
    Failed,
}

impl NodePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Pending => "pending",
            NodePhase::Running => "running",
            NodePhase::Done => "done",
            NodePhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodePhase::Done | NodePhase::Failed)
    }
}

impl std::fmt::Display for NodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-generation scheduling flags
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeState {
    /// Set by every mutation and every execution; cleared after a clean run
    pub changed: bool,
    pub running: bool,
    pub done: bool,
    /// Error produced in the current generation
    pub error: Option<NodeError>,
    /// Error carried over from the previous generation; forces a re-run
    pub prior_error: Option<NodeError>,
}

/// One instance of a kernel in the graph
pub struct Node {
    name: String,
    kernel: String,
    parameters: BTreeMap<String, String>,
    inputs: Vec<NodeInput>,
    outputs: Vec<NodeData>,
    bypass: bool,
    position: [f32; 2],
    pub(crate) state: NodeState,
    pub(crate) context: Option<ExecutionContext>,
    pub(crate) source: Option<SourceStamp>,
}

impl Node {
    /// Fresh node: default parameters, unconnected declared inputs and
    /// zero-value outputs sized from the definition. Kernels with unbounded
    /// inputs start with no slots and grow as inputs are added.
    pub(crate) fn new(name: String, def: &KernelDef) -> Self {
        let input_count = if def.has_unbounded_inputs() {
            0
        } else {
            def.inputs().len()
        };
        Self {
            name,
            kernel: def.name().to_string(),
            parameters: def.default_parameters(),
            inputs: vec![NodeInput::default(); input_count],
            outputs: vec![NodeData::default(); def.outputs().len()],
            bypass: false,
            position: [0.0, 0.0],
            state: NodeState {
                changed: true,
                ..NodeState::default()
            },
            context: None,
            source: None,
        }
    }

    /// Node restored from a saved record; the kernel may be unknown
    pub(crate) fn restore(
        name: String,
        kernel: String,
        parameters: BTreeMap<String, String>,
        inputs: Vec<NodeInput>,
        output_count: usize,
    ) -> Self {
        Self {
            name,
            kernel,
            parameters,
            inputs,
            outputs: vec![NodeData::default(); output_count],
            bypass: false,
            position: [0.0, 0.0],
            state: NodeState {
                changed: true,
                ..NodeState::default()
            },
            context: None,
            source: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn inputs(&self) -> &[NodeInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeData] {
        &self.outputs
    }

    /// Output token, zero-valued when the index is past the end
    pub fn output(&self, index: usize) -> NodeData {
        self.outputs.get(index).cloned().unwrap_or_default()
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn position(&self) -> [f32; 2] {
        self.position
    }

    /// Editor position; does not affect evaluation
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = [x, y];
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
        self.state.changed = true;
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        if self.bypass != bypass {
            self.bypass = bypass;
            self.state.changed = true;
        }
    }

    pub fn is_changed(&self) -> bool {
        self.state.changed
    }

    /// Force a re-run in the next generation
    pub fn mark_changed(&mut self) {
        self.state.changed = true;
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    /// Error of the last generation that reached this node
    pub fn error(&self) -> Option<&NodeError> {
        self.state.error.as_ref().or(self.state.prior_error.as_ref())
    }

    pub fn phase(&self) -> NodePhase {
        if self.state.running {
            NodePhase::Running
        } else if self.state.error.is_some() {
            NodePhase::Failed
        } else if self.state.done {
            NodePhase::Done
        } else {
            NodePhase::Pending
        }
    }

    /// Live execution context holding this node's results, if any
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.context.as_mut()
    }

    pub fn source(&self) -> Option<&SourceStamp> {
        self.source.as_ref()
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.name = name;
        self.state.changed = true;
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut Vec<NodeInput> {
        &mut self.inputs
    }

    /// Install a kernel's results; the list never shrinks and slots the
    /// kernel did not fill reset to zero-value tokens
    pub(crate) fn set_outputs(&mut self, outputs: Vec<NodeData>) {
        let len = self.outputs.len().max(outputs.len());
        let mut outputs = outputs;
        outputs.resize(len, NodeData::default());
        self.outputs = outputs;
    }

    /// Close the execution context, logging instead of failing
    pub(crate) fn close_context(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.destroy() {
                tracing::warn!(node = %self.name, error = %e, "failed to close execution context");
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kernel", &self.kernel)
            .field("parameters", &self.parameters)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("bypass", &self.bypass)
            .field("phase", &self.phase())
            .field("error", &self.error())
            .finish()
    }
}
