use serde::{Deserialize, Serialize};
use sqlgraph_storage::DatabaseRef;

/// Value carried along a wired edge: the databases a downstream kernel may
/// attach. A zero-value token references nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub dbs: Vec<DatabaseRef>,
}

impl NodeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(db: DatabaseRef) -> Self {
        Self { dbs: vec![db] }
    }

    pub fn push(&mut self, db: DatabaseRef) {
        self.dbs.push(db);
    }

    /// Append every reference of `other`, keeping order
    pub fn extend_from(&mut self, other: &NodeData) {
        self.dbs.extend(other.dbs.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty()
    }

    pub fn databases(&self) -> &[DatabaseRef] {
        &self.dbs
    }
}
