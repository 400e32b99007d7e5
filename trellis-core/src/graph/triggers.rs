//! Update Triggers
//!
//! Registries from a structural key to the dependencies whose target
//! discovery looked at that structure. When the structure changes, the
//! engine looks the key up here to find the edges it must re-examine.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::node::ComponentId;
use super::store::DependencyId;

/// A structural aspect of the tree that target discovery can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKey {
    /// The active children of a parent.
    Parent(ComponentId),

    /// The descendants of an ancestor.
    Ancestor(ComponentId),

    /// The ancestor chain of a component.
    AncestorsOf(ComponentId),

    /// The replacements of a composite.
    Composite(ComponentId),

    /// Sibling counters among the children of a parent.
    Counter(ComponentId),

    /// A referenced component that does not exist yet.
    MissingComponent(ComponentId),
}

impl TriggerKey {
    pub fn component(&self) -> ComponentId {
        match *self {
            TriggerKey::Parent(id)
            | TriggerKey::Ancestor(id)
            | TriggerKey::AncestorsOf(id)
            | TriggerKey::Composite(id)
            | TriggerKey::Counter(id)
            | TriggerKey::MissingComponent(id) => id,
        }
    }
}

/// Update-trigger index, searchable by key and by dependency.
#[derive(Debug, Default)]
pub struct UpdateTriggers {
    by_key: HashMap<TriggerKey, IndexSet<DependencyId>>,
    by_dependency: HashMap<DependencyId, IndexSet<TriggerKey>>,
}

impl UpdateTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: TriggerKey, dependency: DependencyId) -> bool {
        let inserted = self.by_key.entry(key).or_default().insert(dependency);
        if inserted {
            self.by_dependency.entry(dependency).or_default().insert(key);
        }
        inserted
    }

    /// Drop every registration of `dependency`.
    pub fn clear_dependency(&mut self, dependency: DependencyId) {
        let Some(keys) = self.by_dependency.remove(&dependency) else {
            return;
        };
        for key in keys {
            if let Some(set) = self.by_key.get_mut(&key) {
                set.shift_remove(&dependency);
                if set.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }

    /// Snapshot of the dependencies registered under `key`.
    pub fn dependencies_for(&self, key: TriggerKey) -> Vec<DependencyId> {
        self.by_key
            .get(&key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, key: TriggerKey) -> usize {
        self.by_key.get(&key).map_or(0, IndexSet::len)
    }

    pub fn keys_of(&self, dependency: DependencyId) -> Vec<TriggerKey> {
        self.by_dependency
            .get(&dependency)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every key that names `component`, returning the dependencies
    /// that were registered under them.
    pub fn take_component(&mut self, component: ComponentId) -> Vec<DependencyId> {
        let keys: Vec<TriggerKey> = self
            .by_key
            .keys()
            .filter(|key| key.component() == component)
            .copied()
            .collect();
        let mut affected: IndexSet<DependencyId> = IndexSet::new();
        for key in keys {
            if let Some(set) = self.by_key.remove(&key) {
                for dependency in set {
                    if let Some(registered) = self.by_dependency.get_mut(&dependency) {
                        registered.shift_remove(&key);
                        if registered.is_empty() {
                            self.by_dependency.remove(&dependency);
                        }
                    }
                    affected.insert(dependency);
                }
            }
        }
        affected.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
