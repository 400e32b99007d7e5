//! Cycle detection on the value graph and on the resolution order.
//!
//! Both checks are depth-first walks that fail when a node reappears on
//! the current path. Nodes proven acyclic are remembered until the graph
//! they were proven on changes.

use std::collections::HashSet;
use std::hash::Hash;

use indexmap::IndexSet;
use tracing::error;

use super::Engine;
use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::graph::{ComponentId, Item, StateVarKey, VarName};
use crate::host::ComponentTree;

/// Walk from `start`. Returns the nodes proven acyclic, or the cycle found,
/// in path order.
fn find_cycle<N, F>(
    start: N,
    known: &HashSet<N>,
    mut successors: F,
) -> std::result::Result<Vec<N>, Vec<N>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> Vec<N>,
{
    if known.contains(&start) {
        return Ok(Vec::new());
    }
    let mut path: IndexSet<N> = IndexSet::new();
    let mut done: Vec<N> = Vec::new();
    let mut finished: HashSet<N> = HashSet::new();
    let mut stack = vec![successors(&start).into_iter()];
    path.insert(start);

    while let Some(next) = stack.last_mut() {
        match next.next() {
            Some(node) => {
                if known.contains(&node) || finished.contains(&node) {
                    continue;
                }
                if let Some(position) = path.get_index_of(&node) {
                    return Err(path.into_iter().skip(position).collect());
                }
                stack.push(successors(&node).into_iter());
                path.insert(node);
            }
            None => {
                stack.pop();
                if let Some(node) = path.pop() {
                    finished.insert(node.clone());
                    done.push(node);
                }
            }
        }
    }
    Ok(done)
}

/// "<type> #id (line L, column C)" for each distinct component, in order.
fn describe_components(
    tree: &dyn ComponentTree,
    components: impl IntoIterator<Item = ComponentId>,
) -> String {
    let distinct: IndexSet<ComponentId> = components.into_iter().collect();
    distinct
        .into_iter()
        .map(|id| {
            let component_type = tree.component_type(id).unwrap_or("unknown");
            match tree.source_position(id) {
                Some(position) => format!(
                    "<{component_type}> {id} (line {}, column {})",
                    position.line, position.column
                ),
                None => format!("<{component_type}> {id}"),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Engine {
    /// Fail if the value graph reachable from a state variable is cyclic.
    pub fn check_for_circular_dependency(
        &mut self,
        tree: &dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self
            .require_variable(id, name)
            .and_then(|name| self.check_value_cycle(tree, id, &name));
        self.guard(result)
    }

    /// Fail if the blocker graph reachable from an item is cyclic.
    pub fn check_for_circular_resolve_blocker(
        &mut self,
        tree: &dyn ComponentTree,
        item: &Item,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self.check_resolution_cycle(tree, item);
        self.guard(result)
    }

    pub(super) fn check_value_cycle(
        &mut self,
        tree: &dyn ComponentTree,
        id: ComponentId,
        name: &VarName,
    ) -> Result<()> {
        let start = StateVarKey::new(id, name.clone());
        let store = &self.store;
        let successors = |key: &StateVarKey| -> Vec<StateVarKey> {
            let Some(primary) = store.primary_of(key.component, key.name.as_str()) else {
                return Vec::new();
            };
            store
                .edges_of(key.component, primary.as_str())
                .into_iter()
                .filter_map(|(_, edge)| store.edge(edge))
                .flat_map(Dependency::target_keys)
                .collect()
        };

        match find_cycle(start, &self.acyclic_values, successors) {
            Ok(done) => {
                self.acyclic_values.extend(done);
                Ok(())
            }
            Err(cycle) => {
                let message = format!(
                    "circular dependency involving these components: {}",
                    describe_components(tree, cycle.iter().map(|key| key.component))
                );
                error!(cycle = ?cycle, "{message}");
                Err(Error::CircularDependency { message })
            }
        }
    }

    pub(super) fn check_resolution_cycle(
        &mut self,
        tree: &dyn ComponentTree,
        item: &Item,
    ) -> Result<()> {
        let blockers = &self.blockers;
        let walk = find_cycle(item.clone(), &self.acyclic_items, |item| {
            blockers.blockers_snapshot(item)
        });
        match walk {
            Ok(done) => {
                self.acyclic_items.extend(done);
                Ok(())
            }
            Err(cycle) => {
                let message = format!(
                    "circular dependency in resolution order involving these components: {}",
                    describe_components(tree, cycle.iter().map(|item| item.component))
                );
                error!(cycle = ?cycle, "{message}");
                Err(Error::CircularResolution { message })
            }
        }
    }
}
