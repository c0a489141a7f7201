use crate::error::{KernelError, KernelResult};
use crate::kernel::{Invocation, Kernel, KernelDef};
use crate::token::NodeData;

/// Concatenates the database lists of all inputs, in slot order
pub struct MergeKernel;

impl MergeKernel {
    pub fn definition() -> KernelDef {
        KernelDef::new("merge", MergeKernel)
            .input("db", false)
            .output("db", false)
            .unbounded_inputs()
    }
}

impl Kernel for MergeKernel {
    fn execute(&self, inputs: &[NodeData], _call: &mut Invocation) -> KernelResult<Vec<NodeData>> {
        if inputs.is_empty() {
            return Err(KernelError::NoInputs);
        }
        let mut merged = NodeData::new();
        for input in inputs {
            merged.extend_from(input);
        }
        Ok(vec![merged])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgraph_storage::DatabaseRef;
    use std::collections::BTreeMap;

    fn call() -> Invocation {
        Invocation::new("m", BTreeMap::new(), "databases", "ns")
    }

    #[test]
    fn test_merge_concatenates_in_slot_order() {
        let a = NodeData::single(DatabaseRef::file("a.db", "a"));
        let mut b = NodeData::single(DatabaseRef::file("b.db", "b"));
        b.push(DatabaseRef::memory("ns-c", "c"));

        let out = MergeKernel.execute(&[a, b], &mut call()).unwrap();
        let aliases: Vec<_> = out[0].dbs.iter().map(|d| d.alias.as_str()).collect();
        assert_eq!(aliases, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_without_inputs_fails() {
        let err = MergeKernel.execute(&[], &mut call()).unwrap_err();
        assert!(matches!(err, KernelError::NoInputs));
        assert_eq!(err.to_string(), "no inputs");
    }

    #[test]
    fn test_merge_of_empty_tokens_is_empty() {
        let out = MergeKernel
            .execute(&[NodeData::default(), NodeData::default()], &mut call())
            .unwrap();
        assert!(out[0].is_empty());
    }
}
