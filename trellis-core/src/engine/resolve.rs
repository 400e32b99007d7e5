//! The resolution driver.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::{debug, trace};

use super::{Engine, Outcome};
use crate::error::{Error, Result};
use crate::graph::{ComponentId, Item, ItemKind};
use crate::host::ComponentTree;

impl Engine {
    /// Resolve an item and whatever blocks it.
    ///
    /// With `force`, discovery may settle for partial target lists and the
    /// attempt is repeated for as long as the outstanding blocker closure
    /// keeps shrinking. A forced attempt that still cannot finish checks the
    /// resolution order for a cycle.
    pub fn resolve_item(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
        force: bool,
    ) -> Result<Outcome> {
        self.ensure_live()?;
        let result = self.resolve_item_inner(tree, item, force);
        self.guard(result)
    }

    /// Process an item if nothing blocks it any more. Never recurses into
    /// blockers.
    pub fn resolve_if_ready(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
    ) -> Result<Outcome> {
        self.ensure_live()?;
        let result = self.ready(tree, item);
        self.guard(result)
    }

    pub fn resolve_state_variable(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
        force: bool,
    ) -> Result<Outcome> {
        self.ensure_live()?;
        let result = self
            .require_variable(id, name)
            .and_then(|name| self.resolve_item_inner(tree, &Item::state_variable(id, name), force));
        self.guard(result)
    }

    /// Force-resolve every state variable of a component, or only the
    /// named ones.
    pub fn resolve_component(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        names: Option<&[&str]>,
    ) -> Result<Outcome> {
        self.ensure_live()?;
        let result = self.resolve_component_inner(tree, id, names);
        self.guard(result)
    }

    fn resolve_component_inner(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        names: Option<&[&str]>,
    ) -> Result<Outcome> {
        let record = self.store.component(id).ok_or(Error::UnknownComponent(id))?;
        let names = match names {
            Some(names) => names
                .iter()
                .map(|name| self.require_variable(id, name))
                .collect::<Result<Vec<_>>>()?,
            None => record.variables().map(|(name, _)| name.clone()).collect(),
        };

        let mut outcome = Outcome::Resolved;
        for name in names {
            let item = Item::state_variable(id, name);
            if self.resolve_item_inner(tree, &item, true)? == Outcome::NotYet {
                outcome = Outcome::NotYet;
            }
        }
        Ok(outcome)
    }

    pub(super) fn resolve_item_inner(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
        force: bool,
    ) -> Result<Outcome> {
        let mut outcome = self.resolve_closure(tree, item, false, &mut IndexSet::new())?;
        if !force || outcome == Outcome::Resolved {
            return Ok(outcome);
        }

        let mut remaining = self.blockers.closure_size(item);
        loop {
            outcome = self.resolve_closure(tree, item, true, &mut IndexSet::new())?;
            if outcome == Outcome::Resolved {
                return Ok(outcome);
            }
            let now = self.blockers.closure_size(item);
            if now >= remaining {
                break;
            }
            remaining = now;
        }

        debug!(item = %item, blockers = remaining, "forced resolution stalled");
        self.check_resolution_cycle(&*tree, item)?;
        Ok(Outcome::NotYet)
    }

    /// Depth-first over the blocker closure of `item`. `path` holds the
    /// items currently being resolved; meeting one again means the order
    /// is circular and is left to the cycle check.
    pub(super) fn resolve_closure(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
        force: bool,
        path: &mut IndexSet<Item>,
    ) -> Result<Outcome> {
        if self.is_settled(item) {
            return Ok(Outcome::Resolved);
        }
        if self.is_resolving(item) || !path.insert(item.clone()) {
            return Ok(Outcome::NotYet);
        }

        let variable = item
            .state_var_key()
            .filter(|_| item.kind == ItemKind::StateVariable);
        if let Some(key) = &variable {
            if let Some(record) = self.store.variable_mut(key.component, key.name.as_str()) {
                record.set_resolving(true);
            }
        }

        let outcome = self.resolve_blockers(tree, item, force, path);

        if let Some(key) = &variable {
            if let Some(record) = self.store.variable_mut(key.component, key.name.as_str()) {
                record.set_resolving(false);
            }
        }
        path.shift_remove(item);
        outcome
    }

    fn resolve_blockers(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
        force: bool,
        path: &mut IndexSet<Item>,
    ) -> Result<Outcome> {
        // Resolving one blocker can release or add others, so work from
        // fresh snapshots until every current blocker has had a turn.
        let mut tried: HashSet<Item> = HashSet::new();
        loop {
            let next = self
                .blockers
                .blockers_snapshot(item)
                .into_iter()
                .find(|blocker| !tried.contains(blocker));
            let Some(blocker) = next else {
                break;
            };
            tried.insert(blocker.clone());
            if !self.blockers.has(item, &blocker) {
                continue;
            }
            let outcome = self.resolve_closure(tree, &blocker, force, path)?;
            if outcome == Outcome::Resolved {
                // Settled blockers that never released this item.
                self.blockers.remove(item, &blocker);
            }
        }

        if force
            && item.kind == ItemKind::RecalculateDownstreamComponents
            && self.is_blocked(item)
        {
            if let Some(edge) = self.edge_of_item(item) {
                self.recalculate_dependency(tree, edge, true)?;
            }
        }

        if self.is_blocked(item) {
            return Ok(Outcome::NotYet);
        }
        if self.is_settled(item) {
            return Ok(Outcome::Resolved);
        }
        self.process_newly_resolved(tree, item)?;
        Ok(if self.is_settled(item) { Outcome::Resolved } else { Outcome::NotYet })
    }

    /// Process an item whose blockers have cleared. A variable whose own
    /// resolution is still on the stack is left for that frame to finish.
    pub(super) fn ready(&mut self, tree: &mut dyn ComponentTree, item: &Item) -> Result<Outcome> {
        if self.is_blocked(item) || self.is_resolving(item) {
            return Ok(Outcome::NotYet);
        }
        self.process_newly_resolved(tree, item)?;
        Ok(if self.is_settled(item) { Outcome::Resolved } else { Outcome::NotYet })
    }

    /// Whether a state variable item is being resolved further up the stack.
    fn is_resolving(&self, item: &Item) -> bool {
        item.kind == ItemKind::StateVariable
            && item
                .state_var_key()
                .and_then(|key| self.store.variable(key.component, key.name.as_str()))
                .is_some_and(|record| record.is_resolving())
    }

    /// Whether an item has nothing left to do.
    fn is_settled(&self, item: &Item) -> bool {
        match item.kind {
            ItemKind::StateVariable => item
                .state_var_key()
                .is_some_and(|key| self.is_variable_resolved(&key)),
            ItemKind::ComponentCreated => self.store.contains_component(item.component),
            ItemKind::ExpandComposite => {
                self.blockers.blocked_by(item).next().is_none() && !self.is_blocked(item)
            }
            ItemKind::DetermineDependencies | ItemKind::RecalculateDownstreamComponents => {
                !self.is_blocked(item) && self.blockers.blocked_by(item).next().is_none()
            }
        }
    }

    /// Act on an item whose blockers have all cleared.
    fn process_newly_resolved(&mut self, tree: &mut dyn ComponentTree, item: &Item) -> Result<()> {
        match item.kind {
            ItemKind::StateVariable => {
                if let Some(key) = item.state_var_key() {
                    let record = self.store.variable_mut(key.component, key.name.as_str());
                    if let Some(record) = record.filter(|record| !record.is_resolved()) {
                        record.mark_resolved();
                        trace!(state_variable = %key, "resolved");
                    }
                }
                self.release(tree, item)
            }
            ItemKind::DetermineDependencies => {
                self.determine_dependencies(tree, item)?;
                self.release(tree, item)
            }
            ItemKind::RecalculateDownstreamComponents => {
                match self.edge_of_item(item) {
                    Some(edge) => {
                        self.recalculate_dependency(tree, edge, false)?;
                    }
                    None => self.blockers.purge(item),
                }
                Ok(())
            }
            ItemKind::ExpandComposite => self.expand(tree, item.component).map(|_| ()),
            ItemKind::ComponentCreated => {
                if self.store.contains_component(item.component) {
                    self.release(tree, item)?;
                }
                Ok(())
            }
        }
    }

    /// Remove `item` as a blocker everywhere and advance whatever that
    /// leaves unblocked.
    pub(super) fn release(&mut self, tree: &mut dyn ComponentTree, item: &Item) -> Result<()> {
        for waiting in self.blockers.blocked_snapshot(item) {
            if self.blockers.remove(&waiting, item) {
                self.ready(tree, &waiting)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyDefinition;
    use crate::graph::Resolution;
    use crate::host::{ComponentSpec, MemoryTree, Specification, VarDef};
    use serde_json::{json, Value};

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn number(value: i64) -> ComponentSpec {
        ComponentSpec::new("number").variable(VarDef::essential("value", value))
    }

    fn copy_of(name: &str, target: ComponentId, source: &str) -> VarDef {
        let definition = DependencyDefinition::state_variable(source).of(target);
        VarDef::computed(
            name,
            Specification::of([("source", definition)]),
            |dependencies| dependencies.single("source").cloned().unwrap_or(Value::Null),
        )
    }

    #[test]
    fn resolution_cascades_down_a_chain() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number(3));
        tree.insert(id(2), None, ComponentSpec::new("text").variable(copy_of("x", id(1), "value")));
        tree.insert(id(3), None, ComponentSpec::new("text").variable(copy_of("x", id(2), "x")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        assert_eq!(engine.status(id(3), "x"), Some(Resolution::NeverComputed));
        let outcome = engine
            .resolve_item(&mut tree, &Item::state_variable(id(3), "x"), false)
            .unwrap();
        assert_eq!(outcome, Outcome::Resolved);
        assert_eq!(engine.status(id(1), "value"), Some(Resolution::Fresh));
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::Fresh));
        assert!(!engine.is_blocked(&Item::state_variable(id(3), "x")));
    }

    #[test]
    fn resolve_if_ready_does_not_recurse() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number(3));
        tree.insert(id(2), None, ComponentSpec::new("text").variable(copy_of("x", id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let x = Item::state_variable(id(2), "x");
        assert_eq!(engine.resolve_if_ready(&mut tree, &x).unwrap(), Outcome::NotYet);
        assert_eq!(engine.status(id(1), "value"), Some(Resolution::NeverComputed));

        // Resolving the target releases the dependent too.
        let value = Item::state_variable(id(1), "value");
        assert_eq!(engine.resolve_if_ready(&mut tree, &value).unwrap(), Outcome::Resolved);
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::Fresh));
    }

    #[test]
    fn variables_being_resolved_are_not_reentered() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number(3));
        tree.insert(id(2), None, ComponentSpec::new("text").variable(copy_of("x", id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        // As if an outer frame were still resolving x
        let x = Item::state_variable(id(2), "x");
        engine.store.variable_mut(id(2), "x").unwrap().set_resolving(true);

        // Releasing x's blocker leaves it unblocked but unprocessed
        let value = Item::state_variable(id(1), "value");
        assert_eq!(engine.resolve_item(&mut tree, &value, false).unwrap(), Outcome::Resolved);
        assert!(!engine.is_blocked(&x));
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::NeverComputed));
        assert_eq!(engine.resolve_if_ready(&mut tree, &x).unwrap(), Outcome::NotYet);
        assert_eq!(engine.resolve_item(&mut tree, &x, false).unwrap(), Outcome::NotYet);

        // The owning frame finishes it
        engine.store.variable_mut(id(2), "x").unwrap().set_resolving(false);
        assert_eq!(engine.resolve_item(&mut tree, &x, false).unwrap(), Outcome::Resolved);
        assert_eq!(engine.status(id(2), "x"), Some(Resolution::Fresh));
    }

    #[test]
    fn missing_target_is_not_yet_even_when_forced() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, ComponentSpec::new("text").variable(copy_of("x", id(5), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let x = Item::state_variable(id(1), "x");
        assert_eq!(engine.resolve_item(&mut tree, &x, true).unwrap(), Outcome::NotYet);
        assert!(!engine.is_poisoned());
        assert_eq!(engine.status(id(1), "x"), Some(Resolution::NeverComputed));
    }

    #[test]
    fn forced_resolution_accepts_partial_children() {
        let mut tree = MemoryTree::new()
            .with_composite_type("group")
            .with_child_group("numbers", ["number"]);
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("sum").variable(VarDef::computed(
                "total",
                Specification::of([("terms", DependencyDefinition::child(["numbers"], ["value"]))]),
                |dependencies| {
                    let total: i64 = dependencies
                        .components("terms")
                        .iter()
                        .filter_map(|term| term.get("value").and_then(Value::as_i64))
                        .sum();
                    json!(total)
                },
            )),
        );
        tree.insert(id(2), Some(id(1)), number(2));
        tree.insert(
            id(3),
            Some(id(1)),
            ComponentSpec::new("group").replaced_by(vec![number(5)]),
        );
        tree.hold_expansion(id(3), true);
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let total = Item::state_variable(id(1), "total");
        assert_eq!(engine.resolve_item(&mut tree, &total, false).unwrap(), Outcome::NotYet);
        assert_eq!(engine.resolve_item(&mut tree, &total, true).unwrap(), Outcome::Resolved);
        assert_eq!(engine.value(&mut tree, id(1), "total").unwrap(), Some(json!(2)));
    }

    #[test]
    fn resolve_component_reports_each_variable() {
        let mut tree = MemoryTree::new();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("text")
                .variable(VarDef::essential("a", 1))
                .variable(copy_of("b", id(9), "value")),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let partial = engine.resolve_component(&mut tree, id(1), Some(&["a"]));
        assert_eq!(partial.unwrap(), Outcome::Resolved);
        assert_eq!(engine.resolve_component(&mut tree, id(1), None).unwrap(), Outcome::NotYet);
        assert!(engine.resolve_component(&mut tree, id(1), Some(&["zzz"])).is_err());
    }
}
