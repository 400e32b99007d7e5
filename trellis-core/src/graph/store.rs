//! Graph Store
//!
//! The store owns every materialized dependency in an arena indexed by
//! [`DependencyId`], together with the two indices that must always agree:
//!
//! - downstream: (owning component, primary state variable) -> edge name -> id
//! - upstream: (target component, target variable) -> ids of edges pointing at it
//!
//! Edges that target a component without naming a variable are indexed
//! under [`UpstreamSlot::Identity`], so detaching a component still finds
//! them.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use super::node::{ComponentId, ComponentRecord, EdgeName, StateVarKey, StateVarRecord, VarName};
use crate::dependency::Dependency;

/// Index of a dependency in the store's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(u32);

impl DependencyId {
    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Where on a target component an edge is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpstreamSlot {
    Variable(VarName),
    Identity,
}

/// Components, edges and the bidirectional edge indices.
#[derive(Debug, Default)]
pub struct GraphStore {
    components: HashMap<ComponentId, ComponentRecord>,
    edges: Vec<Option<Dependency>>,
    free: Vec<u32>,
    downstream: HashMap<StateVarKey, IndexMap<EdgeName, DependencyId>>,
    upstream: HashMap<ComponentId, HashMap<UpstreamSlot, IndexSet<DependencyId>>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn insert_component(&mut self, id: ComponentId, record: ComponentRecord) {
        self.components.insert(id, record);
    }

    pub fn remove_component(&mut self, id: ComponentId) -> Option<ComponentRecord> {
        self.components.remove(&id)
    }

    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub fn component(&self, id: ComponentId) -> Option<&ComponentRecord> {
        self.components.get(&id)
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut ComponentRecord> {
        self.components.get_mut(&id)
    }

    pub fn variable(&self, component: ComponentId, name: &str) -> Option<&StateVarRecord> {
        self.components.get(&component)?.variable(name)
    }

    pub fn variable_mut(
        &mut self,
        component: ComponentId,
        name: &str,
    ) -> Option<&mut StateVarRecord> {
        self.components.get_mut(&component)?.variable_mut(name)
    }

    /// The group members of the group containing `name`, or just `name`
    /// when the component is unknown.
    pub fn group_of(&self, component: ComponentId, name: &VarName) -> Vec<VarName> {
        self.components
            .get(&component)
            .and_then(|record| record.group_of(name.as_str()))
            .map(<[VarName]>::to_vec)
            .unwrap_or_else(|| vec![name.clone()])
    }

    /// Primary of the group containing `name`.
    pub fn primary_of(&self, component: ComponentId, name: &str) -> Option<VarName> {
        self.variable(component, name).map(|record| record.primary().clone())
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.components.keys().copied().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Add an edge to the arena and index it as a downstream edge of its
    /// owner. Upstream links are added separately as targets materialize.
    pub fn insert_edge(&mut self, dependency: Dependency) -> DependencyId {
        let key = StateVarKey::new(dependency.owner(), dependency.state_variable().clone());
        let name = dependency.name().clone();
        let id = match self.free.pop() {
            Some(raw) => {
                self.edges[raw as usize] = Some(dependency);
                DependencyId(raw)
            }
            None => {
                self.edges.push(Some(dependency));
                DependencyId((self.edges.len() - 1) as u32)
            }
        };
        self.downstream.entry(key).or_default().insert(name, id);
        id
    }

    /// Remove an edge from the arena and from both indices.
    pub fn remove_edge(&mut self, id: DependencyId) -> Option<Dependency> {
        let dependency = self.edges.get_mut(id.0 as usize)?.take()?;
        self.free.push(id.0);

        let key = StateVarKey::new(dependency.owner(), dependency.state_variable().clone());
        if let Some(edges) = self.downstream.get_mut(&key) {
            edges.shift_remove(dependency.name());
            if edges.is_empty() {
                self.downstream.remove(&key);
            }
        }
        for (component, slot) in dependency.upstream_slots() {
            self.unlink_upstream(component, &slot, id);
        }
        Some(dependency)
    }

    pub fn edge(&self, id: DependencyId) -> Option<&Dependency> {
        self.edges.get(id.0 as usize)?.as_ref()
    }

    pub fn edge_mut(&mut self, id: DependencyId) -> Option<&mut Dependency> {
        self.edges.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn find_edge(&self, owner: ComponentId, primary: &str, name: &str) -> Option<DependencyId> {
        let key = StateVarKey::new(owner, primary);
        self.downstream.get(&key)?.get(name).copied()
    }

    /// Snapshot of the edges owned by a state variable group.
    pub fn edges_of(&self, owner: ComponentId, primary: &str) -> Vec<(EdgeName, DependencyId)> {
        let key = StateVarKey::new(owner, primary);
        self.downstream
            .get(&key)
            .map(|edges| edges.iter().map(|(name, id)| (name.clone(), *id)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every edge owned by any variable of `owner`.
    pub fn edges_of_component(&self, owner: ComponentId) -> Vec<DependencyId> {
        let Some(record) = self.components.get(&owner) else {
            return Vec::new();
        };
        record
            .primaries()
            .flat_map(|primary| self.edges_of(owner, primary.as_str()))
            .map(|(_, id)| id)
            .collect()
    }

    pub fn link_upstream(&mut self, component: ComponentId, slot: UpstreamSlot, id: DependencyId) {
        self.upstream
            .entry(component)
            .or_default()
            .entry(slot)
            .or_default()
            .insert(id);
    }

    pub fn unlink_upstream(
        &mut self,
        component: ComponentId,
        slot: &UpstreamSlot,
        id: DependencyId,
    ) {
        let Some(slots) = self.upstream.get_mut(&component) else {
            return;
        };
        if let Some(ids) = slots.get_mut(slot) {
            ids.shift_remove(&id);
            if ids.is_empty() {
                slots.remove(slot);
            }
        }
        if slots.is_empty() {
            self.upstream.remove(&component);
        }
    }

    /// Snapshot of the edges pointing at one slot of a component.
    pub fn upstream_of(&self, component: ComponentId, slot: &UpstreamSlot) -> Vec<DependencyId> {
        self.upstream
            .get(&component)
            .and_then(|slots| slots.get(slot))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the edges pointing at a state variable.
    pub fn upstream_of_variable(
        &self,
        component: ComponentId,
        name: &VarName,
    ) -> Vec<DependencyId> {
        self.upstream_of(component, &UpstreamSlot::Variable(name.clone()))
    }

    /// Snapshot of every edge pointing at any slot of a component.
    pub fn upstream_of_component(&self, component: ComponentId) -> Vec<DependencyId> {
        let mut ids: IndexSet<DependencyId> = IndexSet::new();
        if let Some(slots) = self.upstream.get(&component) {
            for set in slots.values() {
                ids.extend(set.iter().copied());
            }
        }
        let mut ids: Vec<_> = ids.into_iter().collect();
        ids.sort();
        ids
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of (edge, target slot) pairs in the upstream index.
    pub fn upstream_link_count(&self) -> usize {
        self.upstream
            .values()
            .flat_map(HashMap::values)
            .map(IndexSet::len)
            .sum()
    }

    /// Whether every live edge appears in exactly the index entries its
    /// targets imply, and nothing else does.
    pub fn is_consistent(&self) -> bool {
        let mut expected = 0;
        for (raw, slot) in self.edges.iter().enumerate() {
            let Some(dependency) = slot else { continue };
            let id = DependencyId(raw as u32);
            let indexed = self.find_edge(
                dependency.owner(),
                dependency.state_variable().as_str(),
                dependency.name().as_str(),
            );
            if indexed != Some(id) {
                return false;
            }
            for (component, slot) in dependency.upstream_slots() {
                expected += 1;
                let linked = self
                    .upstream
                    .get(&component)
                    .and_then(|slots| slots.get(&slot))
                    .is_some_and(|ids| ids.contains(&id));
                if !linked {
                    return false;
                }
            }
        }
        expected == self.upstream_link_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    use crate::dependency::Target;

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn edge(owner: u32, name: &str) -> Dependency {
        Dependency::determination(id(owner), VarName::new(name), vec![VarName::new("which")])
    }

    fn reading(store: &mut GraphStore, dependency: DependencyId, component: u32, name: &str) {
        let target = Target::new(id(component), "number", smallvec![Some(VarName::new(name))]);
        let edge = store.edge_mut(dependency).unwrap();
        edge.replace_targets(vec![target]);
        for (component, slot) in edge.upstream_slots() {
            store.link_upstream(component, slot, dependency);
        }
    }

    #[test]
    fn edges_are_indexed_downstream() {
        let mut store = GraphStore::new();
        let first = store.insert_edge(edge(1, "out"));
        let second = store.insert_edge(edge(1, "other"));

        assert_eq!(store.edge_count(), 2);
        assert_eq!(store.edges_of(id(1), "out").len(), 1);
        assert_eq!(store.edges_of(id(1), "out")[0].1, first);
        assert_ne!(first, second);
        assert!(store.edges_of(id(2), "out").is_empty());
        assert!(store.is_consistent());
    }

    #[test]
    fn removal_clears_both_indices() {
        let mut store = GraphStore::new();
        let dependency = store.insert_edge(edge(1, "out"));
        reading(&mut store, dependency, 2, "value");

        assert_eq!(store.upstream_of_variable(id(2), &VarName::new("value")), vec![dependency]);
        assert_eq!(store.upstream_of_component(id(2)), vec![dependency]);
        assert!(store.is_consistent());

        let removed = store.remove_edge(dependency).unwrap();
        assert_eq!(removed.owner(), id(1));
        assert!(store.edge(dependency).is_none());
        assert!(store.edges_of(id(1), "out").is_empty());
        assert!(store.upstream_of_component(id(2)).is_empty());
        assert_eq!(store.upstream_link_count(), 0);
        assert!(store.remove_edge(dependency).is_none());
        assert!(store.is_consistent());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut store = GraphStore::new();
        let first = store.insert_edge(edge(1, "out"));
        store.remove_edge(first);
        let second = store.insert_edge(edge(2, "out"));
        assert_eq!(first, second);
        assert_eq!(store.edge(second).unwrap().owner(), id(2));
    }

    #[test]
    fn missing_upstream_link_is_inconsistent() {
        let mut store = GraphStore::new();
        let dependency = store.insert_edge(edge(1, "out"));
        reading(&mut store, dependency, 2, "value");
        store.unlink_upstream(id(2), &UpstreamSlot::Variable(VarName::new("value")), dependency);
        assert!(!store.is_consistent());

        store.link_upstream(id(2), UpstreamSlot::Variable(VarName::new("value")), dependency);
        store.link_upstream(id(3), UpstreamSlot::Identity, dependency);
        assert!(!store.is_consistent());
    }
}
