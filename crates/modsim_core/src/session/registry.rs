use crate::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Model name to its most recently compiled artifact. At most one artifact
/// exists per name; entries are never removed.
#[derive(Debug)]
pub struct ModelRegistry<A> {
    models: BTreeMap<String, Arc<A>>,
}

impl<A> Default for ModelRegistry<A> {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }
}

impl<A> ModelRegistry<A> {
    /// Inserts or overwrites. Returns true when an earlier artifact was replaced.
    pub fn register(&mut self, name: impl Into<String>, artifact: A) -> bool {
        self.models.insert(name.into(), Arc::new(artifact)).is_some()
    }

    pub fn get(&self, name: &str) -> PipelineResult<Arc<A>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::ModelNotCompiled(name.to_string()))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
