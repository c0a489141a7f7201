//! Instrumented kernels shared by the integration tests

#![allow(dead_code)]

use sqlgraph_orchestration::{
    DatabaseRef, EngineConfig, Graph, Invocation, KernelDef, KernelError, KernelResult, NodeData,
    Registry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Execution log written by the test kernels
#[derive(Default)]
pub struct Recorder {
    order: Mutex<Vec<String>>,
    runs: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn record(&self, node: &str) {
        self.order.lock().unwrap().push(node.to_string());
        *self.runs.lock().unwrap().entry(node.to_string()).or_default() += 1;
    }

    pub fn runs(&self, node: &str) -> usize {
        self.runs.lock().unwrap().get(node).copied().unwrap_or(0)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn position(&self, node: &str) -> Option<usize> {
        self.order().iter().position(|n| n == node)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.order.lock().unwrap().clear();
        self.runs.lock().unwrap().clear();
    }
}

/// Registry with the built-ins plus:
/// - `source`: no inputs, emits one reference aliased after the node
/// - `pass`: unbounded inputs, concatenates; fails when param `fail` is "1"
/// - `flaky`: one input, fails on its first execution only
/// - `slow`: one input, sleeps param `ms` and tracks peak concurrency
/// - `panic`: panics
/// - `writer`: opens an in-memory result inside a transaction it never commits
/// - `half_detach`: materializes a result, then fails to detach
pub fn registry(recorder: &Arc<Recorder>) -> Registry {
    let mut registry = Registry::with_builtins();

    let p = Arc::clone(recorder);
    registry
        .register(
            KernelDef::new(
                "source",
                move |_: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    p.record(call.node_name());
                    let name = call.node_name().to_string();
                    Ok(vec![NodeData::single(DatabaseRef::file(
                        format!("{}.db", name),
                        name,
                    ))])
                },
            )
            .output("db", false),
        )
        .unwrap();

    let p = Arc::clone(recorder);
    registry
        .register(
            KernelDef::new(
                "pass",
                move |inputs: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    p.record(call.node_name());
                    if call.param("fail") == "1" {
                        return Err(KernelError::Other(anyhow::anyhow!("boom")));
                    }
                    let mut out = NodeData::new();
                    for input in inputs {
                        out.extend_from(input);
                    }
                    Ok(vec![out])
                },
            )
            .input("db", false)
            .output("db", false)
            .unbounded_inputs(),
        )
        .unwrap();

    let p = Arc::clone(recorder);
    registry
        .register(
            KernelDef::new(
                "flaky",
                move |inputs: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    p.record(call.node_name());
                    if p.runs(call.node_name()) == 1 {
                        return Err(KernelError::Other(anyhow::anyhow!("transient")));
                    }
                    Ok(inputs.to_vec())
                },
            )
            .input("db", false)
            .output("db", false),
        )
        .unwrap();

    let p = Arc::clone(recorder);
    registry
        .register(
            KernelDef::new(
                "slow",
                move |inputs: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    let now = p.active.fetch_add(1, Ordering::SeqCst) + 1;
                    p.peak.fetch_max(now, Ordering::SeqCst);
                    let ms = call.param("ms").parse().unwrap_or(20);
                    std::thread::sleep(Duration::from_millis(ms));
                    p.record(call.node_name());
                    p.active.fetch_sub(1, Ordering::SeqCst);
                    Ok(inputs.to_vec())
                },
            )
            .input("db", false)
            .output("db", false),
        )
        .unwrap();

    registry
        .register(
            KernelDef::new(
                "panic",
                |_: &[NodeData], _: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    panic!("kernel exploded")
                },
            )
            .output("db", false),
        )
        .unwrap();

    registry
        .register(
            KernelDef::new(
                "writer",
                |_: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    let name = call.memory_name();
                    let node = call.node_name().to_string();
                    let ctx = call.open_context(&name, true)?;
                    ctx.begin()?;
                    ctx.write("CREATE TABLE result AS SELECT 5 AS v", [])?;
                    Ok(vec![NodeData::single(DatabaseRef::memory(name, node))])
                },
            )
            .output("db", false),
        )
        .unwrap();

    registry
        .register(
            KernelDef::new(
                "half_detach",
                |_: &[NodeData], call: &mut Invocation| -> KernelResult<Vec<NodeData>> {
                    let name = call.memory_name();
                    let ctx = call.open_context(&name, true)?;
                    ctx.attach(&format!("{}-scratch", name), "scratch", true)
                        .map_err(KernelError::Attach)?;
                    ctx.write("CREATE TABLE main.result AS SELECT 9 AS v", [])
                        .map_err(KernelError::Statement)?;
                    ctx.detach("never_attached").map_err(KernelError::Detach)?;
                    Ok(Vec::new())
                },
            )
            .output("db", false),
        )
        .unwrap();

    registry
}

pub fn graph(recorder: &Arc<Recorder>, config: EngineConfig) -> Graph {
    Graph::new(registry(recorder), config).unwrap()
}
