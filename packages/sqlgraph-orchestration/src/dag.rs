//! Wiring analysis over the node graph
//!
//! The scheduler never precomputes an order; it only needs to know the wiring
//! is acyclic before a generation starts. `parallel_levels` is a diagnostic
//! view of the same edges.

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Finished,
}

/// First wiring cycle found, as a closed path of node names
///
/// Edges run from a node to the nodes its inputs reference; references to
/// missing nodes are skipped (they surface as wiring errors at run time).
pub fn find_cycle(graph: &Graph) -> Option<Vec<String>> {
    let n = graph.len();
    let mut marks = vec![Mark::Unvisited; n];

    for start in 0..n {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::OnStack;
        // (node, next input slot to follow)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let (node, slot) = *frame;
            let inputs = graph.node_at(node).inputs();
            if slot >= inputs.len() {
                marks[node] = Mark::Finished;
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let Some(up) = graph.index_of(&inputs[slot].node) else {
                continue;
            };
            match marks[up] {
                Mark::Unvisited => {
                    marks[up] = Mark::OnStack;
                    stack.push((up, 0));
                }
                Mark::OnStack => {
                    let from = stack.iter().position(|&(i, _)| i == up).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[from..]
                        .iter()
                        .map(|&(i, _)| graph.node_at(i).name().to_string())
                        .collect();
                    cycle.push(graph.node_at(up).name().to_string());
                    return Some(cycle);
                }
                Mark::Finished => {}
            }
        }
    }
    None
}

pub fn ensure_acyclic(graph: &Graph) -> Result<()> {
    match find_cycle(graph) {
        Some(cycle) => Err(EngineError::CycleDetected { cycle }),
        None => Ok(()),
    }
}

/// Nodes grouped by dependency depth; each group only depends on earlier ones
///
/// Groups keep insertion order. Unconnected or dangling inputs do not count
/// as dependencies.
pub fn parallel_levels(graph: &Graph) -> Result<Vec<Vec<String>>> {
    ensure_acyclic(graph)?;

    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        for input in graph.node_at(i).inputs() {
            if let Some(up) = graph.index_of(&input.node) {
                in_degree[i] += 1;
                dependents.entry(up).or_default().push(i);
            }
        }
    }

    let mut levels = Vec::new();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            for &d in dependents.get(&i).map(Vec::as_slice).unwrap_or(&[]) {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    next.push(d);
                }
            }
        }
        levels.push(
            ready
                .iter()
                .map(|&i| graph.node_at(i).name().to_string())
                .collect(),
        );
        next.sort_unstable();
        next.dedup();
        ready = next;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn graph() -> Graph {
        Graph::with_builtins(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_acyclic_graph() {
        let mut g = graph();
        g.add_node("f1", "file").unwrap();
        g.add_node("f2", "file").unwrap();
        g.add_node("m", "merge").unwrap();
        g.add_node("s", "select").unwrap();
        g.add_input("m", "f1", 0).unwrap();
        g.add_input("m", "f2", 0).unwrap();
        g.set_input("s", 0, "m", 0).unwrap();

        assert!(find_cycle(&g).is_none());
        ensure_acyclic(&g).unwrap();
    }

    #[test]
    fn test_two_node_cycle() {
        let mut g = graph();
        g.add_node("a", "select").unwrap();
        g.add_node("b", "select").unwrap();
        g.set_input("a", 0, "b", 0).unwrap();
        g.set_input("b", 0, "a", 0).unwrap();

        let cycle = find_cycle(&g).unwrap();
        assert_eq!(cycle, vec!["a", "b", "a"]);
        assert!(matches!(
            ensure_acyclic(&g),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_self_loop() {
        let mut g = graph();
        g.add_node("m", "merge").unwrap();
        g.add_input("m", "m", 0).unwrap();
        assert_eq!(find_cycle(&g).unwrap(), vec!["m", "m"]);
    }

    #[test]
    fn test_dangling_reference_is_not_a_cycle() {
        let mut g = graph();
        g.add_node("f", "file").unwrap();
        g.add_node("s", "select").unwrap();
        g.set_input("s", 0, "f", 0).unwrap();
        g.remove_node("f").unwrap();
        assert!(find_cycle(&g).is_none());
    }

    #[test]
    fn test_parallel_levels() {
        let mut g = graph();
        g.add_node("f1", "file").unwrap();
        g.add_node("f2", "file").unwrap();
        g.add_node("m", "merge").unwrap();
        g.add_node("s", "select").unwrap();
        g.add_input("m", "f1", 0).unwrap();
        g.add_input("m", "f2", 0).unwrap();
        g.set_input("s", 0, "m", 0).unwrap();

        let levels = parallel_levels(&g).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["f1", "f2"]);
        assert_eq!(levels[1], vec!["m"]);
        assert_eq!(levels[2], vec!["s"]);
    }

    #[test]
    fn test_parallel_levels_with_repeated_edge() {
        let mut g = graph();
        g.add_node("f", "file").unwrap();
        g.add_node("m", "merge").unwrap();
        g.add_input("m", "f", 0).unwrap();
        g.add_input("m", "f", 0).unwrap();

        let levels = parallel_levels(&g).unwrap();
        assert_eq!(levels, vec![vec!["f".to_string()], vec!["m".to_string()]]);
    }
}
