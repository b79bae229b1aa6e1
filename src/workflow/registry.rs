/// Workflow definition registry using ArcSwap
///
/// Process-wide lookup of definitions by name, constructed at startup and
/// passed to whoever needs it. Readers never block: each registration swaps
/// the whole map pointer while running workflows keep the `Arc` of the
/// definition they started with.

use crate::error::{Result, WorkflowError};
use crate::workflow::types::WorkflowDefinition;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    /// Key: workflow name, Value: validated definition
    definitions: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Fails if the name is already taken; use
    /// `replace` for intentional updates.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let name = definition.name().to_string();
        let definition = Arc::new(definition);
        let mut conflict = false;

        self.definitions.rcu(|current| {
            conflict = current.contains_key(&name);
            if conflict {
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), Arc::clone(&definition));
            Arc::new(next)
        });

        if conflict {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow {} is already registered",
                name
            )));
        }
        tracing::info!("📋 Registered workflow definition: {}", name);
        Ok(definition)
    }

    /// Register or overwrite a definition. Runs already started keep the old one.
    pub fn replace(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let name = definition.name().to_string();
        let definition = Arc::new(definition);

        self.definitions.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), Arc::clone(&definition));
            next
        });

        tracing::info!("🔥 Replaced workflow definition: {}", name);
        definition
    }

    /// Lock-free lookup by name
    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.load().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        self.definitions.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(name).is_some();
            next
        });
        if removed {
            tracing::info!("Removed workflow definition: {}", name);
        }
        removed
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.load().keys().cloned().collect();
        names.sort();
        names
    }
}
