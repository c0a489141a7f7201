use crate::error::{EngineError, Result};
use crate::kernel::KernelDef;
use std::collections::HashMap;
use std::sync::Arc;

/// Kernel definitions by name, in registration order
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kernels: Vec<Arc<KernelDef>>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `file`, `merge` and `select`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::kernels::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, def: KernelDef) -> Result<Arc<KernelDef>> {
        if self.index.contains_key(def.name()) {
            return Err(EngineError::DuplicateKernel(def.name().to_string()));
        }
        let def = Arc::new(def);
        self.index.insert(def.name().to_string(), self.kernels.len());
        self.kernels.push(Arc::clone(&def));
        Ok(def)
    }

    pub fn find(&self, name: &str) -> Option<&Arc<KernelDef>> {
        self.index.get(name).map(|&i| &self.kernels[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<KernelDef>> {
        self.kernels.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
