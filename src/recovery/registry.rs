//! Resources known to recovery, by name
//!
//! Record participants name their resource; recovery looks the name up
//! here to replay a commit or to ask for in-doubt branches.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::xa::XaResource;

#[derive(Default)]
pub struct RecoveryRegistry {
    resources: RwLock<BTreeMap<String, Arc<dyn XaResource>>>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the resource's own name, replacing any previous entry
    pub fn register(&self, resource: Arc<dyn XaResource>) {
        let name = resource.name().to_string();
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, resource);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn XaResource>> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered resources in name order
    pub fn snapshot(&self) -> Vec<Arc<dyn XaResource>> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xa::SimulatedResource;

    #[test]
    fn test_register_replaces_by_name() {
        let registry = RecoveryRegistry::new();
        registry.register(Arc::new(SimulatedResource::new("db")));
        registry.register(Arc::new(SimulatedResource::new("db")));
        registry.register(Arc::new(SimulatedResource::new("amq")));

        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["amq", "db"]);

        assert!(registry.unregister("db"));
        assert!(!registry.unregister("db"));
        assert!(registry.get("db").is_none());
    }
}
