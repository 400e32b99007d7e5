//! Dependency Engine
//!
//! One [`Engine`] per open document. It owns the graph store, the blocker
//! index, the update-trigger index and the cycle-check caches, and is
//! driven by the component tree through the methods below. The tree is
//! passed into every call that may need it, so the engine never holds on
//! to it.
//!
//! # Resolution
//!
//! Resolution is on demand. Asking for a state variable walks its blocker
//! closure depth-first, resolving whatever is ready and cascading to
//! whatever that unblocks. Anything that cannot finish yet stays blocked
//! and the request returns [`Outcome::NotYet`]. A forced request retries
//! with partial discovery allowed, for as long as the outstanding blocker
//! closure keeps shrinking; if it stops shrinking the resolution-order
//! graph is checked for a cycle.
//!
//! # Errors
//!
//! Fatal errors poison the engine. Every later call returns the same error
//! until the document is dropped.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::dependency::DependencyDefinition;
//! use trellis_core::engine::Engine;
//! use trellis_core::graph::ComponentId;
//! use trellis_core::host::{ComponentSpec, MemoryTree, Specification, VarDef};
//!
//! let a = ComponentId::new(1);
//! let b = ComponentId::new(2);
//!
//! let mut tree = MemoryTree::new();
//! tree.insert(a, None, ComponentSpec::new("text").variable(VarDef::computed(
//!     "x",
//!     Specification::of([("source", DependencyDefinition::state_variable("value").of(b))]),
//!     |dependencies| dependencies.single("source").cloned().unwrap_or_default(),
//! )));
//!
//! let mut engine = Engine::default();
//! tree.attach_all(&mut engine).unwrap();
//! assert_eq!(engine.value(&mut tree, a, "x").unwrap(), None);
//!
//! tree.insert(b, None, ComponentSpec::new("number").variable(VarDef::essential("value", 5)));
//! engine.attach_component(&mut tree, b).unwrap();
//! engine.component_created(&mut tree, b).unwrap();
//! assert_eq!(engine.value(&mut tree, a, "x").unwrap(), Some(json!(5)));
//! ```

mod cycle;
mod resolve;
mod setup;
mod structure;
mod values;

use std::collections::HashSet;

use tracing::{error, trace};

use crate::config::EngineConfig;
use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::graph::{
    BlockerIndex, ComponentId, DependencyId, EdgeName, GraphStore, Item, ItemKind, Resolution,
    StateVarKey, TriggerKey, UpdateTriggers, UpstreamSlot, VarName,
};

pub use structure::UpdateMode;

/// Result of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Resolved,

    /// Something the item needs does not exist or has not resolved yet.
    /// Not an error: the item stays blocked and is retried when the
    /// structure it waits on changes.
    NotYet,
}

/// The dependency engine of one document.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    store: GraphStore,
    blockers: BlockerIndex,
    triggers: UpdateTriggers,

    /// State variables known not to reach a value cycle.
    acyclic_values: HashSet<StateVarKey>,

    /// Items known not to reach a blocker cycle.
    acyclic_items: HashSet<Item>,

    /// Missing components already warned about.
    warned_missing: HashSet<ComponentId>,

    fatal: Option<Error>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn blockers(&self) -> &BlockerIndex {
        &self.blockers
    }

    pub fn triggers(&self) -> &UpdateTriggers {
        &self.triggers
    }

    /// The error that poisoned the engine, if any.
    pub fn fatal_error(&self) -> Option<&Error> {
        self.fatal.as_ref()
    }

    pub fn is_poisoned(&self) -> bool {
        self.fatal.is_some()
    }

    fn ensure_live(&self) -> Result<()> {
        match &self.fatal {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Poison the engine if `result` carries a fatal error.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && self.fatal.is_none() {
                error!(error = %err, "dependency engine poisoned");
                self.fatal = Some(err.clone());
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Blocker primitives
    // ------------------------------------------------------------------

    /// Record that `blocked` needs `blocker` resolved first. Idempotent.
    ///
    /// A fresh state variable that gains a blocker becomes stale, and so
    /// does everything that depends on it.
    pub fn add_blocker(&mut self, blocked: Item, blocker: Item) -> bool {
        self.block(blocked, blocker)
    }

    pub fn remove_blocker(&mut self, blocked: &Item, blocker: &Item) -> bool {
        self.blockers.remove(blocked, blocker)
    }

    pub fn remove_blockers_of_kind(&mut self, blocked: &Item, kind: ItemKind) -> usize {
        self.blockers.remove_kind(blocked, kind)
    }

    pub fn remove_all_blockers(&mut self, blocked: &Item) -> usize {
        self.blockers.remove_all(blocked)
    }

    pub fn is_blocked(&self, item: &Item) -> bool {
        self.blockers.is_blocked(item)
    }

    pub(crate) fn block(&mut self, blocked: Item, blocker: Item) -> bool {
        if !self.blockers.add(blocked.clone(), blocker.clone()) {
            return false;
        }
        self.acyclic_items.clear();
        trace!(blocked = %blocked, blocker = %blocker, "added blocker");

        if blocked.kind == ItemKind::StateVariable {
            if let Some(name) = &blocked.state_variable {
                let became_stale = self
                    .store
                    .variable_mut(blocked.component, name.as_str())
                    .is_some_and(|record| record.mark_blocked());
                if became_stale {
                    self.reblock_upstream(blocked.component, name);
                }
            }
        }
        true
    }

    /// Block every dependent of a variable that just went stale.
    fn reblock_upstream(&mut self, component: ComponentId, name: &VarName) {
        let key = StateVarKey::new(component, name.clone());
        for id in self.store.upstream_of_variable(component, name) {
            self.block_on_target(id, &key);
        }
    }

    /// Block whatever an edge's owner resolves through on one of its
    /// targets.
    fn block_on_target(&mut self, id: DependencyId, key: &StateVarKey) {
        let Some(edge) = self.store.edge(id) else {
            return;
        };
        let determination = edge
            .is_determination()
            .then(|| Item::determine_dependencies(edge.owner(), edge.state_variable().clone()));
        let owners = self.group_items(edge.owner(), edge.state_variable());
        let target = Item::state_variable(key.component, key.name.clone());

        match determination {
            Some(determine) => {
                self.block(determine.clone(), target);
                for owner in owners {
                    self.block(owner, determine.clone());
                }
            }
            None => {
                for owner in owners {
                    self.block(owner, target.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    fn require_component(&self, id: ComponentId) -> Result<()> {
        if self.store.contains_component(id) {
            Ok(())
        } else {
            Err(Error::UnknownComponent(id))
        }
    }

    /// The stored name of a state variable.
    fn require_variable(&self, id: ComponentId, name: &str) -> Result<VarName> {
        let record = self.store.component(id).ok_or(Error::UnknownComponent(id))?;
        record
            .variables()
            .find(|(candidate, _)| candidate.as_str() == name)
            .map(|(candidate, _)| candidate.clone())
            .ok_or_else(|| Error::UnknownStateVariable {
                component: id,
                state_variable: VarName::from(name),
            })
    }

    /// State variable items of every member of a group.
    fn group_items(&self, id: ComponentId, primary: &VarName) -> Vec<Item> {
        self.store
            .component(id)
            .and_then(|record| record.group(primary.as_str()))
            .map(|members| {
                members
                    .iter()
                    .map(|member| Item::state_variable(id, member.clone()))
                    .collect()
            })
            .unwrap_or_else(|| vec![Item::state_variable(id, primary.clone())])
    }

    /// Items that cannot resolve until an edge is settled: the owner's
    /// group, or the determine-dependencies item for the synthetic edge.
    fn dependent_items(&self, id: DependencyId) -> Vec<Item> {
        let Some(edge) = self.store.edge(id) else {
            return Vec::new();
        };
        if edge.is_determination() {
            vec![Item::determine_dependencies(edge.owner(), edge.state_variable().clone())]
        } else {
            self.group_items(edge.owner(), edge.state_variable())
        }
    }

    fn edge_of_item(&self, item: &Item) -> Option<DependencyId> {
        if item.kind != ItemKind::RecalculateDownstreamComponents {
            return None;
        }
        let name = item.state_variable.as_ref()?;
        let dependency = item.dependency.as_ref()?;
        self.store.find_edge(item.component, name.as_str(), dependency.as_str())
    }

    fn is_variable_resolved(&self, key: &StateVarKey) -> bool {
        self.store
            .variable(key.component, key.name.as_str())
            .is_some_and(|record| record.is_resolved())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn status(&self, id: ComponentId, name: &str) -> Option<Resolution> {
        self.store.variable(id, name).map(|record| record.resolution())
    }

    pub fn has_ever_resolved(&self, id: ComponentId, name: &str) -> bool {
        self.store.variable(id, name).is_some_and(|record| record.ever_resolved())
    }

    /// An edge of the group containing `state_variable`.
    pub fn dependency(
        &self,
        id: ComponentId,
        state_variable: &str,
        edge: &str,
    ) -> Option<&Dependency> {
        let primary = self.store.primary_of(id, state_variable)?;
        let edge = self.store.find_edge(id, primary.as_str(), edge)?;
        self.store.edge(edge)
    }

    /// Names of the edges of the group containing `state_variable`.
    pub fn dependency_names(&self, id: ComponentId, state_variable: &str) -> Vec<EdgeName> {
        let Some(primary) = self.store.primary_of(id, state_variable) else {
            return Vec::new();
        };
        self.store
            .edges_of(id, primary.as_str())
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Current target variables of an edge.
    pub fn targets(&self, id: ComponentId, state_variable: &str, edge: &str) -> Vec<StateVarKey> {
        self.dependency(id, state_variable, edge)
            .map(Dependency::target_keys)
            .unwrap_or_default()
    }

    /// Edges reading a state variable, as (owner, owning primary, edge name).
    pub fn upstream_dependents(
        &self,
        id: ComponentId,
        name: &str,
    ) -> Vec<(ComponentId, VarName, EdgeName)> {
        self.store
            .upstream_of(id, &UpstreamSlot::Variable(VarName::from(name)))
            .into_iter()
            .filter_map(|edge| self.store.edge(edge))
            .map(|edge| (edge.owner(), edge.state_variable().clone(), edge.name().clone()))
            .collect()
    }

    pub fn blockers_of(&self, item: &Item) -> Vec<Item> {
        self.blockers.blockers_snapshot(item)
    }

    pub fn blocked_by(&self, item: &Item) -> Vec<Item> {
        self.blockers.blocked_snapshot(item)
    }

    pub fn trigger_count(&self, key: TriggerKey) -> usize {
        self.triggers.count(key)
    }

    /// Mutation counter of the blocker index.
    pub fn generation(&self) -> u64 {
        self.blockers.generation()
    }

    /// Whether the edge indices and the blocker index are each internally
    /// consistent.
    pub fn is_consistent(&self) -> bool {
        self.store.is_consistent() && self.blockers.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyDefinition;
    use crate::host::{ComponentSpec, MemoryTree, Specification, VarDef};
    use serde_json::{json, Value};

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn number() -> ComponentSpec {
        ComponentSpec::new("number").variable(VarDef::essential("value", 1))
    }

    fn copy_of(target: ComponentId, name: &str) -> VarDef {
        VarDef::computed(
            "x",
            Specification::of([("source", DependencyDefinition::state_variable(name).of(target))]),
            |dependencies| dependencies.single("source").cloned().unwrap_or(Value::Null),
        )
    }

    #[test]
    fn blocking_a_fresh_variable_restales_dependents() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(id(2), None, ComponentSpec::new("text").variable(copy_of(id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        assert_eq!(engine.value(&mut tree, id(2), "x").unwrap(), Some(json!(1)));
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::Fresh));

        let outside = Item::component_created(id(9));
        assert!(engine.add_blocker(Item::state_variable(id(1), "value"), outside.clone()));
        assert!(!engine.add_blocker(Item::state_variable(id(1), "value"), outside));
        assert_eq!(engine.status(id(1), "value"), Some(Resolution::Stale));
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::Stale));
        assert!(engine.has_ever_resolved(id(2), "x"));
        assert_eq!(
            engine.blockers_of(&Item::state_variable(id(2), "x")),
            vec![Item::state_variable(id(1), "value")]
        );
        assert!(engine.is_consistent());
    }

    #[test]
    fn unknown_lookups_do_not_poison() {
        let mut tree = MemoryTree::new();
        let mut engine = Engine::default();
        let err = engine.value(&mut tree, id(4), "x").unwrap_err();
        assert_eq!(err, Error::UnknownComponent(id(4)));
        assert!(!engine.is_poisoned());
    }

    #[test]
    fn introspection_reports_edges() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(id(2), None, ComponentSpec::new("text").variable(copy_of(id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        assert_eq!(engine.dependency_names(id(2), "x"), vec![EdgeName::from("source")]);
        assert_eq!(engine.targets(id(2), "x", "source"), vec![StateVarKey::new(id(1), "value")]);
        assert_eq!(
            engine.upstream_dependents(id(1), "value"),
            vec![(id(2), VarName::from("x"), EdgeName::from("source"))]
        );
        assert_eq!(engine.trigger_count(TriggerKey::MissingComponent(id(1))), 0);
    }
}
