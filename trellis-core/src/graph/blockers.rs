//! Resolve Blockers
//!
//! A blocker records "item A cannot resolve until item B resolves". It is
//! stored twice: under A in `needed_to_resolve` and under B in
//! `resolve_blocked_by`. Every insertion and deletion touches both maps so
//! they stay mirror images, and either direction can be queried or cleared
//! without scanning.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;

use super::node::{ComponentId, EdgeName, StateVarKey, VarName};

/// What part of a component an [`Item`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    /// A state variable's resolution.
    StateVariable,

    /// The discovery phase of a two-phase state variable.
    DetermineDependencies,

    /// Target discovery of one dependency that has not yet succeeded.
    RecalculateDownstreamComponents,

    /// Expansion of a composite into its replacements.
    ExpandComposite,

    /// A referenced component that does not exist yet.
    ComponentCreated,
}

impl ItemKind {
    fn label(self) -> &'static str {
        match self {
            ItemKind::StateVariable => "stateVariable",
            ItemKind::DetermineDependencies => "determineDependencies",
            ItemKind::RecalculateDownstreamComponents => "recalculateDownstreamComponents",
            ItemKind::ExpandComposite => "expandComposite",
            ItemKind::ComponentCreated => "componentCreated",
        }
    }
}

/// A unit of resolution: a component, what kind of thing on it, and the
/// state variable and dependency it concerns where that applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Item {
    pub component: ComponentId,
    pub kind: ItemKind,
    pub state_variable: Option<VarName>,
    pub dependency: Option<EdgeName>,
}

impl Item {
    pub fn state_variable(component: ComponentId, name: impl Into<VarName>) -> Self {
        Self {
            component,
            kind: ItemKind::StateVariable,
            state_variable: Some(name.into()),
            dependency: None,
        }
    }

    pub fn determine_dependencies(component: ComponentId, name: impl Into<VarName>) -> Self {
        Self {
            component,
            kind: ItemKind::DetermineDependencies,
            state_variable: Some(name.into()),
            dependency: None,
        }
    }

    pub fn recalculate(
        component: ComponentId,
        name: impl Into<VarName>,
        dependency: impl Into<EdgeName>,
    ) -> Self {
        Self {
            component,
            kind: ItemKind::RecalculateDownstreamComponents,
            state_variable: Some(name.into()),
            dependency: Some(dependency.into()),
        }
    }

    pub fn expand_composite(component: ComponentId) -> Self {
        Self {
            component,
            kind: ItemKind::ExpandComposite,
            state_variable: None,
            dependency: None,
        }
    }

    pub fn component_created(component: ComponentId) -> Self {
        Self {
            component,
            kind: ItemKind::ComponentCreated,
            state_variable: None,
            dependency: None,
        }
    }

    /// The state variable key, for items that name one.
    pub fn state_var_key(&self) -> Option<StateVarKey> {
        self.state_variable
            .as_ref()
            .map(|name| StateVarKey::new(self.component, name.clone()))
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.component, self.kind.label())?;
        if let Some(name) = &self.state_variable {
            write!(f, "|{name}")?;
        }
        if let Some(dependency) = &self.dependency {
            write!(f, "|{dependency}")?;
        }
        Ok(())
    }
}

/// Bidirectional multimap of resolve blockers.
#[derive(Debug, Default)]
pub struct BlockerIndex {
    /// Blocked item -> the items it waits on.
    needed_to_resolve: HashMap<Item, IndexSet<Item>>,

    /// Blocker item -> the items waiting on it.
    resolve_blocked_by: HashMap<Item, IndexSet<Item>>,

    /// Bumped on every mutation.
    generation: u64,
}

impl BlockerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `blocked` needs `blocker` resolved first.
    ///
    /// Returns `false` if the blocker was already registered, in which case
    /// nothing changes.
    pub fn add(&mut self, blocked: Item, blocker: Item) -> bool {
        let inserted = self
            .needed_to_resolve
            .entry(blocked.clone())
            .or_default()
            .insert(blocker.clone());
        if !inserted {
            return false;
        }
        self.resolve_blocked_by
            .entry(blocker)
            .or_default()
            .insert(blocked);
        self.generation += 1;
        true
    }

    /// Remove one blocker from both directions.
    pub fn remove(&mut self, blocked: &Item, blocker: &Item) -> bool {
        let removed = remove_entry(&mut self.needed_to_resolve, blocked, blocker);
        if removed {
            remove_entry(&mut self.resolve_blocked_by, blocker, blocked);
            self.generation += 1;
        }
        removed
    }

    /// Remove every blocker of `blocked` whose kind is `kind`.
    pub fn remove_kind(&mut self, blocked: &Item, kind: ItemKind) -> usize {
        let matching: Vec<Item> = self
            .blockers_of(blocked)
            .filter(|blocker| blocker.kind == kind)
            .cloned()
            .collect();
        for blocker in &matching {
            self.remove(blocked, blocker);
        }
        matching.len()
    }

    /// Remove every blocker of `blocked`.
    pub fn remove_all(&mut self, blocked: &Item) -> usize {
        let Some(blockers) = self.needed_to_resolve.remove(blocked) else {
            return 0;
        };
        for blocker in &blockers {
            remove_entry(&mut self.resolve_blocked_by, blocker, blocked);
        }
        self.generation += 1;
        blockers.len()
    }

    /// Remove `item` from the index entirely: its own blockers and every
    /// record of it blocking something else.
    pub fn purge(&mut self, item: &Item) {
        self.remove_all(item);
        if let Some(blocked) = self.resolve_blocked_by.remove(item) {
            for waiting in &blocked {
                remove_entry(&mut self.needed_to_resolve, waiting, item);
            }
            self.generation += 1;
        }
    }

    pub fn is_blocked(&self, item: &Item) -> bool {
        self.needed_to_resolve
            .get(item)
            .is_some_and(|blockers| !blockers.is_empty())
    }

    pub fn has(&self, blocked: &Item, blocker: &Item) -> bool {
        self.needed_to_resolve
            .get(blocked)
            .is_some_and(|blockers| blockers.contains(blocker))
    }

    /// Items `blocked` waits on.
    pub fn blockers_of<'a>(&'a self, blocked: &Item) -> impl Iterator<Item = &'a Item> + 'a {
        self.needed_to_resolve.get(blocked).into_iter().flatten()
    }

    /// Items waiting on `blocker`.
    pub fn blocked_by<'a>(&'a self, blocker: &Item) -> impl Iterator<Item = &'a Item> + 'a {
        self.resolve_blocked_by.get(blocker).into_iter().flatten()
    }

    /// Snapshot of the items `blocked` waits on.
    pub fn blockers_snapshot(&self, blocked: &Item) -> Vec<Item> {
        self.blockers_of(blocked).cloned().collect()
    }

    /// Snapshot of the items waiting on `blocker`.
    pub fn blocked_snapshot(&self, blocker: &Item) -> Vec<Item> {
        self.blocked_by(blocker).cloned().collect()
    }

    /// Items that mention `component` on either side.
    pub fn items_of_component(&self, component: ComponentId) -> Vec<Item> {
        let mut items: IndexSet<Item> = IndexSet::new();
        for item in self.needed_to_resolve.keys().chain(self.resolve_blocked_by.keys()) {
            if item.component == component {
                items.insert(item.clone());
            }
        }
        items.into_iter().collect()
    }

    /// Number of distinct items in the blocker closure of `item`, not
    /// counting `item` itself.
    pub fn closure_size(&self, item: &Item) -> usize {
        let mut seen: IndexSet<&Item> = IndexSet::new();
        let mut stack: Vec<&Item> = self.blockers_of(item).collect();
        while let Some(next) = stack.pop() {
            if next == item || !seen.insert(next) {
                continue;
            }
            stack.extend(self.blockers_of(next));
        }
        seen.len()
    }

    /// Total number of registered blockers.
    pub fn len(&self) -> usize {
        self.needed_to_resolve.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutation counter, for detecting no-op operations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the two directions mirror each other exactly.
    pub fn is_consistent(&self) -> bool {
        let forward = self.needed_to_resolve.iter().all(|(blocked, blockers)| {
            blockers.iter().all(|blocker| {
                self.resolve_blocked_by
                    .get(blocker)
                    .is_some_and(|waiting| waiting.contains(blocked))
            })
        });
        let backward = self.resolve_blocked_by.iter().all(|(blocker, waiting)| {
            waiting.iter().all(|blocked| {
                self.needed_to_resolve
                    .get(blocked)
                    .is_some_and(|blockers| blockers.contains(blocker))
            })
        });
        let reverse_len: usize = self.resolve_blocked_by.values().map(IndexSet::len).sum();
        forward && backward && self.len() == reverse_len
    }
}

/// Remove `value` from the set under `key`, dropping the set when it empties.
fn remove_entry(map: &mut HashMap<Item, IndexSet<Item>>, key: &Item, value: &Item) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.shift_remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(component: u32, name: &str) -> Item {
        Item::state_variable(ComponentId::new(component), name)
    }

    #[test]
    fn add_is_idempotent() {
        let mut index = BlockerIndex::new();
        assert!(index.add(var(1, "x"), var(2, "y")));
        let generation = index.generation();
        assert!(!index.add(var(1, "x"), var(2, "y")));
        assert_eq!(index.generation(), generation);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_clears_both_directions() {
        let mut index = BlockerIndex::new();
        index.add(var(1, "x"), var(2, "y"));
        assert!(index.is_blocked(&var(1, "x")));
        assert_eq!(index.blocked_snapshot(&var(2, "y")), vec![var(1, "x")]);

        assert!(index.remove(&var(1, "x"), &var(2, "y")));
        assert!(!index.is_blocked(&var(1, "x")));
        assert_eq!(index.blocked_by(&var(2, "y")).count(), 0);
        assert!(index.is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn remove_kind_keeps_other_kinds() {
        let mut index = BlockerIndex::new();
        let blocked = var(1, "x");
        index.add(blocked.clone(), var(2, "y"));
        index.add(blocked.clone(), Item::recalculate(ComponentId::new(1), "x", "ref"));

        assert_eq!(index.remove_kind(&blocked, ItemKind::RecalculateDownstreamComponents), 1);
        assert_eq!(index.blockers_snapshot(&blocked), vec![var(2, "y")]);
        assert!(index.is_consistent());
    }

    #[test]
    fn purge_removes_item_everywhere() {
        let mut index = BlockerIndex::new();
        index.add(var(1, "x"), var(2, "y"));
        index.add(var(2, "y"), var(3, "z"));
        index.add(var(4, "w"), var(2, "y"));

        index.purge(&var(2, "y"));
        assert!(index.is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn closure_counts_distinct_items() {
        let mut index = BlockerIndex::new();
        index.add(var(1, "a"), var(2, "b"));
        index.add(var(1, "a"), var(3, "c"));
        index.add(var(2, "b"), var(3, "c"));
        index.add(var(3, "c"), var(4, "d"));
        assert_eq!(index.closure_size(&var(1, "a")), 3);
        assert_eq!(index.closure_size(&var(4, "d")), 0);
    }

    #[test]
    fn item_display_is_pipe_separated() {
        let item = Item::recalculate(ComponentId::new(5), "value", "source");
        assert_eq!(item.to_string(), "#5|recalculateDownstreamComponents|value|source");
    }
}
