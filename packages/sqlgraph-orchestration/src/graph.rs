//! Graph model: nodes, their wiring and the kernel registry they resolve against
//!
//! All mutations go through [`Graph`]. The scheduler borrows the graph
//! mutably for a whole generation, so editing while a run is in flight is
//! ruled out by the borrow checker rather than by a lock.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::node::{Node, NodeInput};
use crate::registry::Registry;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Schema names SQLite reserves; a node named like this could never be attached
const RESERVED_NAMES: &[&str] = &["main", "temp"];

pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    registry: Registry,
    config: EngineConfig,
    namespace: String,
    interrupt: CancellationToken,
}

impl Graph {
    pub fn new(registry: Registry, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let namespace = config
            .memory_namespace
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            registry,
            config,
            namespace,
            interrupt: CancellationToken::new(),
        })
    }

    /// Graph over the built-in kernels
    pub fn with_builtins(config: EngineConfig) -> Result<Self> {
        Self::new(Registry::with_builtins(), config)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prefix of this graph's shared in-memory database names
    pub fn memory_namespace(&self) -> &str {
        &self.namespace
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn find_node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.index.get(name).map(|&i| &mut self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(Node::name).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn node_at(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub(crate) fn node_at_mut(&mut self, i: usize) -> &mut Node {
        &mut self.nodes[i]
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    fn node_mut_or_err(&mut self, name: &str) -> Result<&mut Node> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(EngineError::NodeNotFound(name.to_string())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Structure
    // ═══════════════════════════════════════════════════════════════════

    /// Add a node running `kernel`
    ///
    /// An empty name falls back to the kernel name; a taken name gets the
    /// first free `_1`, `_2`, ... suffix. Returns the name actually used.
    pub fn add_node(&mut self, name: &str, kernel: &str) -> Result<String> {
        let def = self
            .registry
            .find(kernel)
            .cloned()
            .ok_or_else(|| EngineError::KernelNotFound(kernel.to_string()))?;

        let base = name.trim();
        let base = if base.is_empty() { kernel.trim() } else { base };
        validate_name(base)?;
        let name = self.unique_name(base);

        self.push_node(Node::new(name.clone(), &def));
        debug!(node = %name, kernel = %kernel, "node added");
        Ok(name)
    }

    pub(crate) fn push_node(&mut self, node: Node) {
        self.index.insert(node.name().to_string(), self.nodes.len());
        self.nodes.push(node);
    }

    fn unique_name(&self, base: &str) -> String {
        if !self.index.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.index.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Remove a node; inputs that referenced it become unconnected
    pub fn remove_node(&mut self, name: &str) -> Result<()> {
        let i = self
            .index_of(name)
            .ok_or_else(|| EngineError::NodeNotFound(name.to_string()))?;

        let mut node = self.nodes.remove(i);
        node.close_context();

        for other in self.nodes.iter_mut() {
            let mut touched = false;
            for input in other.inputs_mut().iter_mut() {
                if input.node == name {
                    *input = NodeInput::default();
                    touched = true;
                }
            }
            if touched {
                other.mark_changed();
            }
        }

        self.rebuild_index();
        debug!(node = %name, "node removed");
        Ok(())
    }

    /// Rename `src` to `dst`, rewriting every reference to it
    pub fn rename_node(&mut self, src: &str, dst: &str) -> Result<()> {
        let dst = dst.trim();
        if src == dst {
            return Ok(());
        }
        validate_name(dst)?;
        if self.index.contains_key(dst) {
            return Err(EngineError::DuplicateNode(dst.to_string()));
        }
        let i = self
            .index_of(src)
            .ok_or_else(|| EngineError::NodeNotFound(src.to_string()))?;

        self.nodes[i].rename(dst.to_string());
        for other in self.nodes.iter_mut() {
            let mut touched = false;
            for input in other.inputs_mut().iter_mut() {
                if input.node == src {
                    input.node = dst.to_string();
                    touched = true;
                }
            }
            if touched {
                other.mark_changed();
            }
        }

        self.index.remove(src);
        self.index.insert(dst.to_string(), i);
        debug!(from = %src, to = %dst, "node renamed");
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name().to_string(), i))
            .collect();
    }

    // ═══════════════════════════════════════════════════════════════════
    // Wiring and parameters
    // ═══════════════════════════════════════════════════════════════════

    /// Connect input `slot` of `node` to output `output` of `source`
    ///
    /// `source` must exist and declare `output`. Slots past the declared
    /// inputs are only accepted for kernels with unbounded inputs, which
    /// grow with unconnected slots as needed.
    pub fn set_input(&mut self, node: &str, slot: usize, source: &str, output: usize) -> Result<()> {
        let declared_outputs = self.declared_outputs(source)?;
        if output >= declared_outputs {
            return Err(EngineError::OutputOutOfRange {
                node: source.to_string(),
                output,
                declared: declared_outputs,
            });
        }

        let unbounded = self.is_unbounded(node)?;
        let target = self.node_mut_or_err(node)?;
        let declared = target.inputs().len();
        if slot >= declared {
            if !unbounded {
                return Err(EngineError::InputOutOfRange {
                    node: node.to_string(),
                    slot,
                    declared,
                });
            }
            target.inputs_mut().resize(slot + 1, NodeInput::default());
        }

        target.inputs_mut()[slot] = NodeInput::new(source, output);
        target.mark_changed();
        Ok(())
    }

    /// Append an input slot connected to `source`; returns the new slot
    pub fn add_input(&mut self, node: &str, source: &str, output: usize) -> Result<usize> {
        let slot = self
            .find_node(node)
            .map(|n| n.inputs().len())
            .ok_or_else(|| EngineError::NodeNotFound(node.to_string()))?;
        self.set_input(node, slot, source, output)?;
        Ok(slot)
    }

    /// Disconnect input `slot`
    pub fn clear_input(&mut self, node: &str, slot: usize) -> Result<()> {
        let target = self.node_mut_or_err(node)?;
        let declared = target.inputs().len();
        let input = target
            .inputs_mut()
            .get_mut(slot)
            .ok_or_else(|| EngineError::InputOutOfRange {
                node: node.to_string(),
                slot,
                declared,
            })?;
        *input = NodeInput::default();
        target.mark_changed();
        Ok(())
    }

    pub fn set_param(&mut self, node: &str, key: &str, value: &str) -> Result<()> {
        self.node_mut_or_err(node)?.set_param(key, value);
        Ok(())
    }

    pub fn set_bypass(&mut self, node: &str, bypass: bool) -> Result<()> {
        self.node_mut_or_err(node)?.set_bypass(bypass);
        Ok(())
    }

    fn declared_outputs(&self, name: &str) -> Result<usize> {
        let node = self
            .find_node(name)
            .ok_or_else(|| EngineError::NodeNotFound(name.to_string()))?;
        let declared = self
            .registry
            .find(node.kernel())
            .map(|d| d.outputs().len())
            .unwrap_or(0);
        Ok(declared.max(node.outputs().len()))
    }

    fn is_unbounded(&self, name: &str) -> Result<bool> {
        let node = self
            .find_node(name)
            .ok_or_else(|| EngineError::NodeNotFound(name.to_string()))?;
        Ok(self
            .registry
            .find(node.kernel())
            .map(|d| d.has_unbounded_inputs())
            .unwrap_or(false))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Interruption
    // ═══════════════════════════════════════════════════════════════════

    /// Token that interrupts the current or next generation when cancelled
    ///
    /// Clone it into a signal handler or another task; cancelling is the
    /// only operation it supports.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Arm a fresh token; handles taken before stay cancelled
    pub fn reset_interrupt(&mut self) {
        self.interrupt = CancellationToken::new();
    }

    /// True while any node is executing
    pub fn is_running(&self) -> bool {
        self.nodes.iter().any(Node::is_running)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Staleness and teardown
    // ═══════════════════════════════════════════════════════════════════

    /// Mark nodes whose source file changed on disk since they last ran
    ///
    /// Returns the names of the nodes marked.
    pub fn detect_source_changes(&mut self) -> Vec<String> {
        let mut marked = Vec::new();
        for node in self.nodes.iter_mut() {
            let stale = node.source().map(|s| s.is_stale()).unwrap_or(false);
            if stale {
                node.mark_changed();
                marked.push(node.name().to_string());
            }
        }
        if !marked.is_empty() {
            info!(nodes = ?marked, "source databases changed on disk");
        }
        marked
    }

    /// Close every node's execution context
    pub fn close(&mut self) {
        for node in self.nodes.iter_mut() {
            node.close_context();
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish()
    }
}

/// Names end up as schema aliases and in-memory database names
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::invalid_name(name, "is empty"));
    }
    if name.chars().any(|c| c.is_control() || matches!(c, '"' | '\'' | '?' | '#')) {
        return Err(EngineError::invalid_name(
            name,
            "contains quotes, '?', '#' or control characters",
        ));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(EngineError::invalid_name(name, "is a reserved schema name"));
    }
    Ok(())
}
