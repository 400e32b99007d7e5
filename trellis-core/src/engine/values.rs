//! Reading values and propagating staleness.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde_json::Value;
use tracing::trace;

use super::{Engine, Outcome};
use crate::dependency::{Dependency, DependencyValues, DETERMINE_DEPENDENCIES};
use crate::error::{Error, Result};
use crate::graph::{ComponentId, Item, StateVarKey, VarName};
use crate::host::ComponentTree;

impl Engine {
    /// Resolve a state variable and return its value, or `None` if it
    /// cannot resolve yet.
    pub fn value(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<Option<Value>> {
        self.ensure_live()?;
        let result = self.value_inner(tree, id, name);
        self.guard(result)
    }

    /// Resolve a state variable and return the dependency values its
    /// compute function would receive.
    pub fn dependency_values(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<Option<DependencyValues>> {
        self.ensure_live()?;
        let result = self.dependency_values_inner(tree, id, name);
        self.guard(result)
    }

    /// The value of a state variable changed outside the engine, for
    /// instance an essential value set by the host. Everything computed
    /// from it goes stale.
    pub fn mark_stale(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<()> {
        self.ensure_live()?;
        let name = self.require_variable(id, name)?;
        self.propagate_stale(tree, id, &name, true);
        Ok(())
    }

    fn value_inner(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<Option<Value>> {
        let name = self.require_variable(id, name)?;
        if self.config.check_value_cycles {
            self.check_value_cycle(&*tree, id, &name)?;
        }
        let item = Item::state_variable(id, name.clone());
        if self.resolve_item_inner(tree, &item, true)? == Outcome::NotYet {
            return Ok(None);
        }
        self.evaluate(tree, id, &name).map(Some)
    }

    fn dependency_values_inner(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &str,
    ) -> Result<Option<DependencyValues>> {
        let name = self.require_variable(id, name)?;
        let item = Item::state_variable(id, name.clone());
        if self.resolve_item_inner(tree, &item, true)? == Outcome::NotYet {
            return Ok(None);
        }
        let primary = self.store.primary_of(id, name.as_str()).unwrap_or(name);
        self.gather(tree, id, &primary).map(Some)
    }

    /// The current value of a resolved variable, recomputing it if a
    /// stale notification arrived since it was last computed.
    pub(super) fn evaluate(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &VarName,
    ) -> Result<Value> {
        let record = self
            .store
            .variable(id, name.as_str())
            .ok_or_else(|| Error::UnknownStateVariable {
                component: id,
                state_variable: name.clone(),
            })?;
        if record.value_fresh() {
            if let Some(value) = tree.cached_value(id, name) {
                return Ok(value);
            }
        }
        let primary = record.primary().clone();
        if !record.is_resolved() {
            let item = Item::state_variable(id, name.clone());
            if self.resolve_closure(tree, &item, true, &mut IndexSet::new())? == Outcome::NotYet {
                return Ok(tree.cached_value(id, name).unwrap_or(Value::Null));
            }
        }

        let dependencies = self.gather(tree, id, &primary)?;
        let value = tree.compute_value(id, name, &dependencies)?;
        if let Some(record) = self.store.variable_mut(id, name.as_str()) {
            record.set_value_fresh(true);
        }
        trace!(component = %id, state_variable = %name, "computed value");
        Ok(value)
    }

    /// Dependency values of a group, read from the current targets.
    fn gather(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        primary: &VarName,
    ) -> Result<DependencyValues> {
        let mut values = DependencyValues::new();
        for (name, edge) in self.store.edges_of(id, primary.as_str()) {
            if name.as_str() == DETERMINE_DEPENDENCIES {
                continue;
            }
            let keys = self.store.edge(edge).map(Dependency::target_keys).unwrap_or_default();
            let mut read: HashMap<StateVarKey, (Value, bool)> = HashMap::with_capacity(keys.len());
            for key in keys {
                let value = self.evaluate(tree, key.component, &key.name)?;
                let used_default = tree.used_default(key.component, &key.name);
                read.insert(key, (value, used_default));
            }

            let Some(dependency) = self.store.edge(edge) else {
                continue;
            };
            let (value, used_default) = dependency.project(&self.config, |component, variable| {
                read.get(&StateVarKey::new(component, variable.clone()))
                    .cloned()
                    .unwrap_or((Value::Null, false))
            });
            let changes = self
                .store
                .edge_mut(edge)
                .map(Dependency::take_changes)
                .unwrap_or_default();
            values.insert(name, value, changes, used_default);
        }
        Ok(values)
    }

    /// Clear the value freshness of a group and of everything downstream,
    /// telling the host about every cached value that is now out of date.
    /// Two-phase owners downstream are blocked on re-determination.
    pub(crate) fn propagate_stale(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        name: &VarName,
        origin: bool,
    ) {
        let members = self.store.group_of(id, name);
        let any_fresh = members.iter().any(|member| {
            self.store
                .variable(id, member.as_str())
                .is_some_and(|record| record.value_fresh())
        });
        if !origin && !any_fresh {
            return;
        }

        for member in members {
            let Some(record) = self.store.variable_mut(id, member.as_str()) else {
                continue;
            };
            let was_fresh = record.value_fresh();
            record.set_value_fresh(false);
            if origin || was_fresh {
                tree.mark_stale(id, &member);
            }

            for edge in self.store.upstream_of_variable(id, &member) {
                let Some(dependency) = self.store.edge_mut(edge) else {
                    continue;
                };
                dependency.flag_changed(id, member.as_str());
                let owner = dependency.owner();
                let owner_primary = dependency.state_variable().clone();
                if dependency.is_determination() {
                    let determine = Item::determine_dependencies(owner, owner_primary.clone());
                    for item in self.group_items(owner, &owner_primary) {
                        self.block(item, determine.clone());
                    }
                }
                self.propagate_stale(tree, owner, &owner_primary, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyDefinition;
    use crate::host::{ComponentSpec, MemoryTree, Specification, VarDef};
    use serde_json::json;

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn doubled(target: ComponentId) -> VarDef {
        VarDef::computed(
            "double",
            Specification::of([(
                "source",
                DependencyDefinition::state_variable("value").of(target),
            )]),
            |dependencies| {
                let value = dependencies.single("source").and_then(Value::as_i64).unwrap_or(0);
                json!(value * 2)
            },
        )
    }

    fn pair() -> (MemoryTree, Engine) {
        let mut tree = MemoryTree::new();
        let source = ComponentSpec::new("number").variable(VarDef::essential("value", 4));
        tree.insert(id(1), None, source);
        tree.insert(id(2), None, ComponentSpec::new("number").variable(doubled(id(1))));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        (tree, engine)
    }

    #[test]
    fn values_are_cached_until_stale() {
        let (mut tree, mut engine) = pair();
        assert_eq!(engine.value(&mut tree, id(2), "double").unwrap(), Some(json!(8)));
        assert_eq!(engine.value(&mut tree, id(2), "double").unwrap(), Some(json!(8)));
        assert_eq!(tree.compute_count(id(2), "double"), 1);

        tree.set_essential(id(1), "value", 5);
        engine.mark_stale(&mut tree, id(1), "value").unwrap();
        assert_eq!(tree.stale_count(id(1), "value"), 1);
        assert_eq!(tree.stale_count(id(2), "double"), 1);

        assert_eq!(engine.value(&mut tree, id(2), "double").unwrap(), Some(json!(10)));
        assert_eq!(tree.compute_count(id(2), "double"), 2);
    }

    #[test]
    fn stale_notifications_stop_at_uncomputed_values() {
        let (mut tree, mut engine) = pair();
        engine.mark_stale(&mut tree, id(1), "value").unwrap();
        assert_eq!(tree.stale_count(id(1), "value"), 1);
        assert_eq!(tree.stale_count(id(2), "double"), 0);
    }

    #[test]
    fn dependency_values_carry_change_flags() {
        let (mut tree, mut engine) = pair();
        let first = engine.dependency_values(&mut tree, id(2), "double").unwrap().unwrap();
        assert_eq!(first.single("source"), Some(&json!(4)));
        assert!(first.used_default("source"));
        assert!(first.changed("source"));

        engine.value(&mut tree, id(2), "double").unwrap();
        tree.set_essential(id(1), "value", 6);
        engine.mark_stale(&mut tree, id(1), "value").unwrap();
        let second = engine.dependency_values(&mut tree, id(2), "double").unwrap().unwrap();
        assert_eq!(second.single("source"), Some(&json!(6)));
        assert!(!second.used_default("source"));
        assert!(second.changed("source"));

        let third = engine.dependency_values(&mut tree, id(2), "double").unwrap().unwrap();
        assert!(!third.changed("source"));
    }

    #[test]
    fn unresolvable_values_are_none() {
        let mut tree = MemoryTree::new();
        tree.insert(id(2), None, ComponentSpec::new("number").variable(doubled(id(1))));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert_eq!(engine.value(&mut tree, id(2), "double").unwrap(), None);
        assert!(engine.dependency_values(&mut tree, id(2), "double").unwrap().is_none());
        assert!(engine.mark_stale(&mut tree, id(2), "missing").is_err());
    }
}
