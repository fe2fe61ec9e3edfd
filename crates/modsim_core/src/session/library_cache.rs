use crate::error::{PipelineError, PipelineResult};
use std::collections::HashMap;

/// Library id to the program produced by loading it.
#[derive(Debug, Clone)]
pub struct LibraryCache<P> {
    entries: HashMap<String, P>,
}

impl<P> Default for LibraryCache<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<P> LibraryCache<P> {
    /// Stores `program` under `id`. Returns true when an earlier entry was replaced.
    pub fn insert(&mut self, id: impl Into<String>, program: P) -> bool {
        self.entries.insert(id.into(), program).is_some()
    }

    pub fn get(&self, id: &str) -> PipelineResult<&P> {
        self.entries
            .get(id)
            .ok_or_else(|| PipelineError::LibraryNotLoaded(id.to_string()))
    }

    /// Loaded ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloading_replaces_the_entry() {
        let mut cache = LibraryCache::default();
        assert!(!cache.insert("MSL:3.2.3", 1));
        assert!(cache.insert("MSL:3.2.3", 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get("MSL:3.2.3").expect("loaded"), 2);
    }

    #[test]
    fn missing_ids_are_not_loaded_errors() {
        let cache: LibraryCache<()> = LibraryCache::default();
        let err = cache.get("MSL:4.0.0").expect_err("absent");
        assert!(matches!(err, PipelineError::LibraryNotLoaded(ref id) if id == "MSL:4.0.0"));
    }
}
