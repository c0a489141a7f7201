//! JSON persistence of the graph layout
//!
//! Only the layout is saved: names, kernels, parameters, wiring, bypass and
//! editor position. Outputs and execution contexts are never persisted, so a
//! loaded graph starts with every node changed.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeInput};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Current document format
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub kernel: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<NodeInput>,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub position: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub version: u32,
    pub nodes: Vec<NodeRecord>,
}

impl Graph {
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            version: DOCUMENT_VERSION,
            nodes: self
                .nodes()
                .map(|n| NodeRecord {
                    name: n.name().to_string(),
                    kernel: n.kernel().to_string(),
                    parameters: n.parameters().clone(),
                    inputs: n.inputs().to_vec(),
                    bypass: n.is_bypassed(),
                    position: n.position(),
                })
                .collect(),
        }
    }

    /// Rebuild a graph from a document
    ///
    /// Nodes whose kernel is not registered are kept with no outputs; they
    /// fail with a kernel error when run.
    pub fn from_document(doc: GraphDocument, registry: Registry, config: EngineConfig) -> Result<Self> {
        if doc.version != DOCUMENT_VERSION {
            return Err(EngineError::UnsupportedVersion {
                found: doc.version,
                supported: DOCUMENT_VERSION,
            });
        }

        let mut graph = Graph::new(registry, config)?;
        for record in doc.nodes {
            if graph.find_node(&record.name).is_some() {
                return Err(EngineError::DuplicateNode(record.name));
            }
            let mut inputs = record.inputs;
            let output_count = match graph.registry().find(&record.kernel) {
                Some(def) => {
                    if !def.has_unbounded_inputs() && inputs.len() < def.inputs().len() {
                        inputs.resize(def.inputs().len(), NodeInput::default());
                    }
                    def.outputs().len()
                }
                None => {
                    warn!(node = %record.name, kernel = %record.kernel, "kernel not registered");
                    0
                }
            };
            let mut node = Node::restore(
                record.name,
                record.kernel,
                record.parameters,
                inputs,
                output_count,
            );
            node.set_bypass(record.bypass);
            node.set_position(record.position[0], record.position[1]);
            graph.push_node(node);
        }
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!("Saved graph with {} nodes to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, registry: Registry, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let doc: GraphDocument = serde_json::from_str(&content)?;
        let graph = Self::from_document(doc, registry, config)?;
        info!("Loaded graph with {} nodes from {}", graph.len(), path.display());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        let mut g = Graph::with_builtins(EngineConfig::default()).unwrap();
        g.add_node("f1", "file").unwrap();
        g.set_param("f1", "path", "a.db").unwrap();
        g.add_node("m", "merge").unwrap();
        g.add_input("m", "f1", 0).unwrap();
        g.add_node("s", "select").unwrap();
        g.set_input("s", 0, "m", 0).unwrap();
        g.set_param("s", "query", "SELECT 1").unwrap();
        g.set_bypass("m", true).unwrap();
        g.find_node_mut("s").unwrap().set_position(10.0, 20.0);
        g
    }

    #[test]
    fn test_document_preserves_layout() {
        let g = sample();
        let doc = g.to_document();
        assert_eq!(doc.version, DOCUMENT_VERSION);
        assert_eq!(doc.nodes.len(), 3);

        let loaded = Graph::from_document(doc.clone(), Registry::with_builtins(), EngineConfig::default()).unwrap();
        assert_eq!(loaded.to_document(), doc);

        let s = loaded.find_node("s").unwrap();
        assert_eq!(s.param("query"), Some("SELECT 1"));
        assert_eq!(s.position(), [10.0, 20.0]);
        assert!(s.is_changed());
        assert!(loaded.find_node("m").unwrap().is_bypassed());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        sample().save(&path).unwrap();

        let loaded = Graph::load(&path, Registry::with_builtins(), EngineConfig::default()).unwrap();
        assert_eq!(loaded.node_names(), vec!["f1", "m", "s"]);
        assert_eq!(loaded.find_node("s").unwrap().inputs()[0], NodeInput::new("m", 0));
    }

    #[test]
    fn test_unknown_kernel_is_kept() {
        let json = r#"{"version":1,"nodes":[{"name":"x","kernel":"legacy"}]}"#;
        let doc: GraphDocument = serde_json::from_str(json).unwrap();
        let g = Graph::from_document(doc, Registry::with_builtins(), EngineConfig::default()).unwrap();

        let x = g.find_node("x").unwrap();
        assert_eq!(x.kernel(), "legacy");
        assert!(x.outputs().is_empty());
    }

    #[test]
    fn test_loaded_inputs_padding() {
        let json = r#"{"version":1,"nodes":[
            {"name":"m","kernel":"merge"},
            {"name":"s","kernel":"select"}
        ]}"#;
        let doc: GraphDocument = serde_json::from_str(json).unwrap();
        let g = Graph::from_document(doc, Registry::with_builtins(), EngineConfig::default()).unwrap();

        assert!(g.find_node("m").unwrap().inputs().is_empty());
        assert_eq!(g.find_node("s").unwrap().inputs().len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{"version":1,"nodes":[
            {"name":"a","kernel":"file"},
            {"name":"a","kernel":"file"}
        ]}"#;
        let doc: GraphDocument = serde_json::from_str(json).unwrap();
        let err = Graph::from_document(doc, Registry::with_builtins(), EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(name) if name == "a"));
    }

    #[test]
    fn test_unsupported_version() {
        let doc = GraphDocument {
            version: 99,
            nodes: Vec::new(),
        };
        let err = Graph::from_document(doc, Registry::new(), EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedVersion { found: 99, .. }));
    }
}
