//! Edge set-up, recalculation and teardown.

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::Engine;
use crate::dependency::{
    Dependency, DependencyDefinition, DependencyKind, Discovery, DiscoveryContext, EdgePhase,
    Target, TargetDiscovery, TargetOptions, Wait, DETERMINE_DEPENDENCIES,
};
use crate::error::{Error, Result};
use crate::graph::{
    ComponentId, ComponentRecord, DependencyId, EdgeName, Item, StateVarKey, VarName,
};
use crate::host::{ComponentTree, DeterminingValues, Specification, StateVariableDescription};

/// Result of re-running discovery on one edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Recalc {
    pub succeeded: bool,
    pub changed: bool,
}

fn recalc_item(edge: &Dependency) -> Item {
    Item::recalculate(edge.owner(), edge.state_variable().clone(), edge.name().clone())
}

impl Engine {
    /// Create the edges of every state variable of a component. A component
    /// that is already attached is detached first.
    pub fn attach_component(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self.attach(tree, id);
        self.guard(result)
    }

    /// Remove a component's edges, clear its blockers and triggers, and
    /// re-examine every edge that pointed at it.
    pub fn detach_component(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self.require_component(id).and_then(|()| self.detach(tree, id));
        self.guard(result)
    }

    /// Delete one edge from both indices. Returns `false` if it was already
    /// gone.
    pub fn delete_dependency(&mut self, id: DependencyId) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.remove_dependency(id))
    }

    pub(super) fn attach(&mut self, tree: &mut dyn ComponentTree, id: ComponentId) -> Result<()> {
        let component_type = tree
            .component_type(id)
            .ok_or(Error::UnknownComponent(id))?
            .to_owned();
        if self.store.contains_component(id) {
            debug!(component = %id, "re-attaching component");
            self.detach(tree, id)?;
        }

        let descriptions = tree.state_variables(id);
        let mut record = ComponentRecord::new(component_type.clone());
        for description in &descriptions {
            record.add_group(
                description.members().cloned().collect(),
                (description.public, description.is_array, description.is_array_entry),
            );
        }
        self.store.insert_component(id, record);

        for description in &descriptions {
            self.set_up_state_variable(tree, id, &description.name)?;
        }
        if tree.is_composite_type(&component_type) && tree.replacements(id).is_none() {
            self.prepare_expansion(tree, id);
        }
        debug!(
            component = %id,
            component_type = %component_type,
            groups = descriptions.len(),
            "attached component"
        );
        Ok(())
    }

    pub(super) fn detach(&mut self, tree: &mut dyn ComponentTree, id: ComponentId) -> Result<()> {
        for edge in self.store.edges_of_component(id) {
            self.remove_dependency(edge);
        }

        let mut affected: IndexSet<DependencyId> =
            self.store.upstream_of_component(id).into_iter().collect();
        affected.extend(self.triggers.take_component(id));
        for item in self.blockers.items_of_component(id) {
            self.blockers.purge(&item);
        }
        self.store.remove_component(id);
        self.warned_missing.remove(&id);
        self.acyclic_values.retain(|key| key.component != id);
        self.acyclic_items.retain(|item| item.component != id);
        debug!(component = %id, affected = affected.len(), "detached component");

        for edge in affected {
            let survives = self.store.edge(edge).is_some_and(|edge| edge.owner() != id);
            if survives {
                self.recalculate_dependency(tree, edge, false)?;
            }
        }
        Ok(())
    }

    /// Add a group discovered after attachment, such as a synthesized
    /// array entry.
    fn add_variable_group(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        description: StateVariableDescription,
    ) -> Result<()> {
        let record = self.store.component_mut(id).ok_or(Error::UnknownComponent(id))?;
        record.add_group(
            description.members().cloned().collect(),
            (description.public, description.is_array, description.is_array_entry),
        );
        self.set_up_state_variable(tree, id, &description.name)
    }

    fn set_up_state_variable(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        primary: &VarName,
    ) -> Result<()> {
        match tree.dependency_specification(id, primary, None)? {
            Specification::Dependencies(definitions) => {
                for (name, definition) in definitions {
                    self.create_dependency(tree, id, primary, name, definition)?;
                }
                Ok(())
            }
            Specification::DetermineFrom(variables) => {
                self.set_up_determination(tree, id, primary, variables)
            }
        }
    }

    fn create_dependency(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        primary: &VarName,
        name: EdgeName,
        definition: DependencyDefinition,
    ) -> Result<DependencyId> {
        if name.as_str() == DETERMINE_DEPENDENCIES {
            return Err(Error::invalid(id, primary, &name, "edge name is reserved"));
        }
        let parameters = definition.set_up_parameters(id, primary, &name)?;
        let edge = self.store.insert_edge(Dependency::new(
            name.clone(),
            id,
            primary.clone(),
            parameters,
            Some(definition),
        ));
        trace!(
            component = %id,
            state_variable = %primary,
            dependency = %name,
            "created dependency"
        );
        self.recalculate_dependency(tree, edge, false)?;
        Ok(edge)
    }

    /// First phase of a two-phase variable: an edge over the determining
    /// variables, with the owner blocked until they resolve.
    fn set_up_determination(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        primary: &VarName,
        variables: Vec<VarName>,
    ) -> Result<()> {
        let edge_name = EdgeName::from(DETERMINE_DEPENDENCIES);
        for variable in &variables {
            if self.store.variable(id, variable.as_str()).is_none() {
                return Err(Error::invalid(
                    id,
                    primary,
                    &edge_name,
                    format!("no state variable `{variable}` to determine dependencies from"),
                ));
            }
        }

        let determine = Item::determine_dependencies(id, primary.clone());
        for owner in self.group_items(id, primary) {
            self.block(owner, determine.clone());
        }
        let edge = self
            .store
            .insert_edge(Dependency::determination(id, primary.clone(), variables));
        trace!(component = %id, state_variable = %primary, "created determine-dependencies edge");
        self.recalculate_dependency(tree, edge, false)?;
        Ok(())
    }

    /// Second phase: read the determining values, ask for the real
    /// specification and reconcile the edge set with it.
    pub(super) fn determine_dependencies(
        &mut self,
        tree: &mut dyn ComponentTree,
        item: &Item,
    ) -> Result<()> {
        let component = item.component;
        let Some(primary) = item.state_variable.clone() else {
            return Ok(());
        };
        let Some(edge) = self
            .store
            .find_edge(component, primary.as_str(), DETERMINE_DEPENDENCIES)
        else {
            return Ok(());
        };
        let variables = match self.store.edge(edge).map(Dependency::kind) {
            Some(DependencyKind::DetermineDependencies(determining)) => {
                determining.variables.clone()
            }
            _ => return Ok(()),
        };

        let mut determining = DeterminingValues::new();
        for variable in variables {
            let value = self.evaluate(tree, component, &variable)?;
            determining.insert(variable, value);
        }

        match tree.dependency_specification(component, &primary, Some(&determining))? {
            Specification::DetermineFrom(_) => Err(Error::NestedDetermination {
                component,
                state_variable: primary,
            }),
            Specification::Dependencies(definitions) => {
                self.respecify(tree, component, &primary, definitions)
            }
        }
    }

    /// Reconcile a group's edges with a new specification: drop edges that
    /// are gone or changed, create new ones, leave identical ones alone.
    fn respecify(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        primary: &VarName,
        definitions: IndexMap<EdgeName, DependencyDefinition>,
    ) -> Result<()> {
        let mut changed = false;
        for (name, edge) in self.store.edges_of(id, primary.as_str()) {
            if name.as_str() == DETERMINE_DEPENDENCIES {
                continue;
            }
            let unchanged = definitions.get(name.as_str()).is_some_and(|definition| {
                self.store.edge(edge).and_then(Dependency::definition) == Some(definition)
            });
            if !unchanged {
                self.remove_dependency(edge);
                changed = true;
            }
        }
        for (name, definition) in definitions {
            if self.store.find_edge(id, primary.as_str(), name.as_str()).is_some() {
                continue;
            }
            self.create_dependency(tree, id, primary, name, definition)?;
            changed = true;
        }

        if changed {
            debug!(component = %id, state_variable = %primary, "re-specified dependencies");
            self.propagate_stale(tree, id, primary, false);
        }
        Ok(())
    }

    /// Re-run discovery on one edge and register whatever it found or is
    /// waiting on.
    pub(crate) fn recalculate_dependency(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: DependencyId,
        force: bool,
    ) -> Result<Recalc> {
        let Some(edge) = self.store.edge(id) else {
            return Ok(Recalc::default());
        };
        let recalc = recalc_item(edge);
        let discovery = {
            let cx = DiscoveryContext {
                tree: &*tree,
                store: &self.store,
                config: &self.config,
                owner: edge.owner(),
                requested: edge.requested(),
                options: edge.options(),
                force,
            };
            edge.kind().discover(&cx)
        };

        self.triggers.clear_dependency(id);
        for key in discovery.triggers() {
            self.triggers.register(*key, id);
        }

        match discovery {
            Discovery::Blocked { waits, .. } => {
                let changed = self.set_targets(id, Vec::new(), None);
                let wanted: Vec<Item> = waits
                    .iter()
                    .map(|wait| match *wait {
                        Wait::Component(component) => Item::component_created(component),
                        Wait::Expansion(composite) => Item::expand_composite(composite),
                    })
                    .collect();
                for stale in self.blockers.blockers_snapshot(&recalc) {
                    if !wanted.contains(&stale) {
                        self.blockers.remove(&recalc, &stale);
                    }
                }
                for owner in self.dependent_items(id) {
                    self.block(owner, recalc.clone());
                }
                for (wait, blocker) in waits.into_iter().zip(wanted) {
                    self.block(recalc.clone(), blocker);
                    match wait {
                        Wait::Component(component) => self.warn_missing(tree, component),
                        Wait::Expansion(composite) => self.prepare_expansion(tree, composite),
                    }
                }
                if let Some(edge) = self.store.edge_mut(id) {
                    edge.set_phase(EdgePhase::Blocked);
                }
                trace!(item = %recalc, force, "dependency discovery blocked");
                if changed {
                    self.targets_changed(tree, id);
                }
                Ok(Recalc {
                    succeeded: false,
                    changed,
                })
            }
            Discovery::Found { targets, computed, .. } => {
                let targets = self.materialize_targets(tree, id, &targets)?;
                let changed = self.set_targets(id, targets, computed);
                self.blockers.remove_all(&recalc);
                if let Some(edge) = self.store.edge_mut(id) {
                    edge.set_phase(EdgePhase::Ready);
                }

                let keys = self.store.edge(id).map(Dependency::target_keys).unwrap_or_default();
                for key in keys {
                    if !self.is_variable_resolved(&key) {
                        self.block_on_target(id, &key);
                    }
                }
                trace!(item = %recalc, force, changed, "dependency discovery succeeded");
                self.release(tree, &recalc)?;
                if changed {
                    self.targets_changed(tree, id);
                }
                Ok(Recalc {
                    succeeded: true,
                    changed,
                })
            }
        }
    }

    /// Map every target's requested variables, synthesizing array entries
    /// where the target can provide them.
    fn materialize_targets(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: DependencyId,
        components: &[ComponentId],
    ) -> Result<Vec<Target>> {
        let Some(edge) = self.store.edge(id) else {
            return Ok(Vec::new());
        };
        let owner = edge.owner();
        let primary = edge.state_variable().clone();
        let name = edge.name().clone();
        let requested = edge.requested().to_vec();
        let options = edge.options().clone();

        let mut targets = Vec::with_capacity(components.len());
        for &component in components {
            let component_type = self
                .store
                .component(component)
                .map(|record| record.component_type().to_owned())
                .unwrap_or_default();
            let mut variables: SmallVec<[Option<VarName>; 2]> =
                SmallVec::with_capacity(requested.len());
            for requested_name in &requested {
                let mapped = self.map_target_variable(tree, component, requested_name, &options)?;
                if mapped.is_none() && !options.variables_optional {
                    return Err(Error::invalid(
                        owner,
                        &primary,
                        &name,
                        format!(
                            "<{component_type}> {component} has no state variable `{requested_name}`"
                        ),
                    ));
                }
                variables.push(mapped);
            }
            targets.push(Target::new(component, component_type, variables));
        }
        Ok(targets)
    }

    fn map_target_variable(
        &mut self,
        tree: &mut dyn ComponentTree,
        component: ComponentId,
        requested: &VarName,
        options: &TargetOptions,
    ) -> Result<Option<VarName>> {
        let Some(mut name) =
            tree.map_variable_name(component, requested.as_str(), options.match_options())
        else {
            return self.synthesize_entry(tree, component, requested.as_str());
        };
        if let Some(index) = &options.prop_index {
            match tree.array_entry_name(component, &name, index) {
                Some(entry) => name = entry,
                None => return Ok(None),
            }
        }
        if options.array_size {
            if let Some(size) = tree.array_size_variable(component, &name) {
                name = size;
            }
        }
        if self.store.variable(component, name.as_str()).is_some() {
            return Ok(Some(name));
        }
        self.synthesize_entry(tree, component, name.as_str())
    }

    fn synthesize_entry(
        &mut self,
        tree: &mut dyn ComponentTree,
        component: ComponentId,
        name: &str,
    ) -> Result<Option<VarName>> {
        let Some(description) = tree.create_array_entry(component, name) else {
            return Ok(None);
        };
        let primary = description.name.clone();
        debug!(component = %component, state_variable = %primary, "created array entry");
        self.add_variable_group(tree, component, description)?;
        Ok(Some(primary))
    }

    /// Swap an edge's targets, keeping the upstream index and the owner's
    /// blockers in step. Returns whether anything the owner reads changed.
    fn set_targets(
        &mut self,
        id: DependencyId,
        targets: Vec<Target>,
        computed: Option<serde_json::Value>,
    ) -> bool {
        let Some(edge) = self.store.edge(id) else {
            return false;
        };
        let old_slots = edge.upstream_slots();
        let old_keys = edge.target_keys();
        for (component, slot) in &old_slots {
            self.store.unlink_upstream(*component, slot, id);
        }

        let Some(edge) = self.store.edge_mut(id) else {
            return false;
        };
        let mut changed = edge.replace_targets(targets);
        changed |= edge.set_computed(computed);
        let new_slots = edge.upstream_slots();
        let new_keys = edge.target_keys();
        for (component, slot) in new_slots {
            self.store.link_upstream(component, slot, id);
        }

        for key in old_keys.iter().filter(|key| !new_keys.contains(key)) {
            self.unblock_target(id, key);
        }
        if changed {
            self.acyclic_values.clear();
        }
        changed
    }

    /// Drop the owner's blocker on a variable this edge no longer reads,
    /// unless another edge of the same group still reads it.
    fn unblock_target(&mut self, id: DependencyId, key: &StateVarKey) {
        let Some(edge) = self.store.edge(id) else {
            return;
        };
        let shared = !edge.is_determination()
            && self
                .store
                .edges_of(edge.owner(), edge.state_variable().as_str())
                .into_iter()
                .filter(|(_, other)| *other != id)
                .filter_map(|(_, other)| self.store.edge(other))
                .any(|other| !other.is_determination() && other.target_keys().contains(key));
        if shared {
            return;
        }
        let target = Item::state_variable(key.component, key.name.clone());
        for owner in self.dependent_items(id) {
            self.blockers.remove(&owner, &target);
        }
    }

    /// The owner of an edge whose targets changed must recompute.
    fn targets_changed(&mut self, tree: &mut dyn ComponentTree, id: DependencyId) {
        let Some(edge) = self.store.edge(id) else {
            return;
        };
        if edge.is_determination() {
            return;
        }
        let owner = edge.owner();
        let primary = edge.state_variable().clone();
        self.propagate_stale(tree, owner, &primary, false);
    }

    /// Delete an edge: unblock its owner, drop its recalculation item and
    /// triggers, and remove it from both indices. Idempotent.
    pub(super) fn remove_dependency(&mut self, id: DependencyId) -> bool {
        let Some(edge) = self.store.edge(id) else {
            return false;
        };
        let recalc = recalc_item(edge);
        for key in edge.target_keys() {
            self.unblock_target(id, &key);
        }
        self.blockers.purge(&recalc);
        self.triggers.clear_dependency(id);
        if let Some(edge) = self.store.remove_edge(id) {
            trace!(
                component = %edge.owner(),
                state_variable = %edge.state_variable(),
                dependency = %edge.name(),
                "deleted dependency"
            );
        }
        true
    }

    fn warn_missing(&mut self, tree: &mut dyn ComponentTree, component: ComponentId) {
        if !self.config.warn_on_missing_components || !self.warned_missing.insert(component) {
            return;
        }
        tree.warn(&format!("reference to component {component}, which does not exist yet"));
    }

    /// Block a composite's expansion on its unresolved prerequisites.
    pub(super) fn prepare_expansion(&mut self, tree: &dyn ComponentTree, composite: ComponentId) {
        let expand = Item::expand_composite(composite);
        for prerequisite in tree.expansion_prerequisites(composite) {
            let key = StateVarKey::new(composite, prerequisite);
            let exists = self.store.variable(composite, key.name.as_str()).is_some();
            if exists && !self.is_variable_resolved(&key) {
                self.block(expand.clone(), Item::state_variable(composite, key.name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Outcome;
    use crate::graph::TriggerKey;
    use crate::host::{ComponentSpec, MemoryTree, VarDef};
    use serde_json::{json, Value};

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn number() -> ComponentSpec {
        ComponentSpec::new("number").variable(VarDef::essential("value", 1))
    }

    fn reference(target: ComponentId, name: &str) -> VarDef {
        VarDef::computed(
            "x",
            Specification::of([("source", DependencyDefinition::state_variable(name).of(target))]),
            |dependencies| dependencies.single("source").cloned().unwrap_or(Value::Null),
        )
    }

    #[test]
    fn invalid_definition_poisons_the_engine() {
        let mut tree = MemoryTree::new();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("text").variable(VarDef::computed(
                "x",
                Specification::of([("broken", DependencyDefinition::new("stateVariable"))]),
                |_| Value::Null,
            )),
        );
        let mut engine = Engine::default();
        let err = engine.attach_component(&mut tree, id(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidDependency { .. }));
        assert!(engine.is_poisoned());
        assert_eq!(engine.value(&mut tree, id(1), "x").unwrap_err(), err);
    }

    #[test]
    fn nested_determination_is_fatal() {
        let mut tree = MemoryTree::new();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("select")
                .variable(VarDef::essential("which", "a"))
                .variable(VarDef::determined(
                    "out",
                    ["which"],
                    |_| Specification::DetermineFrom(vec![VarName::from("which")]),
                    |_| Value::Null,
                )),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let err = engine.value(&mut tree, id(1), "out").unwrap_err();
        assert_eq!(
            err,
            Error::NestedDetermination {
                component: id(1),
                state_variable: VarName::from("out"),
            }
        );
        assert!(engine.is_poisoned());
        assert_eq!(engine.value(&mut tree, id(1), "which").unwrap_err(), err);
    }

    #[test]
    fn missing_target_variable_is_invalid_unless_optional() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(id(2), None, ComponentSpec::new("text").variable(reference(id(1), "nope")));
        let mut engine = Engine::default();
        engine.attach_component(&mut tree, id(1)).unwrap();
        let err = engine.attach_component(&mut tree, id(2)).unwrap_err();
        assert!(err.to_string().contains("has no state variable `nope`"));

        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(
            id(2),
            None,
            ComponentSpec::new("text").variable(VarDef::computed(
                "x",
                Specification::of([(
                    "source",
                    DependencyDefinition::state_variable("nope").of(id(1)).optional(),
                )]),
                |dependencies| dependencies.components("source").len().into(),
            )),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert!(engine.value(&mut tree, id(2), "x").unwrap().is_some());
    }

    #[test]
    fn delete_is_idempotent_and_leaves_no_half_edges() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(id(2), None, ComponentSpec::new("text").variable(reference(id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let edge = engine.store().find_edge(id(2), "x", "source").unwrap();
        assert!(engine.is_blocked(&Item::state_variable(id(2), "x")));

        assert!(engine.delete_dependency(edge).unwrap());
        assert!(!engine.delete_dependency(edge).unwrap());
        assert!(engine.upstream_dependents(id(1), "value").is_empty());
        assert!(!engine.is_blocked(&Item::state_variable(id(2), "x")));
        assert!(engine.blocked_by(&Item::state_variable(id(1), "value")).is_empty());
        assert!(engine.is_consistent());
    }

    #[test]
    fn reattaching_replaces_edges() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, number());
        tree.insert(id(2), None, ComponentSpec::new("text").variable(reference(id(1), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert_eq!(engine.value(&mut tree, id(2), "x").unwrap(), Some(json!(1)));

        engine.attach_component(&mut tree, id(2)).unwrap();
        assert_eq!(engine.store().edge_count(), 1);
        assert_eq!(engine.upstream_dependents(id(1), "value").len(), 1);
        assert_eq!(engine.value(&mut tree, id(2), "x").unwrap(), Some(json!(1)));
        assert!(engine.is_consistent());
    }

    #[test]
    fn blocked_discovery_warns_once() {
        let mut tree = MemoryTree::new();
        tree.insert(id(1), None, ComponentSpec::new("text").variable(reference(id(7), "value")));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        for _ in 0..2 {
            let outcome = engine.resolve_state_variable(&mut tree, id(1), "x", true);
            assert_eq!(outcome.unwrap(), Outcome::NotYet);
        }
        assert_eq!(tree.warnings().len(), 1);
        assert_eq!(engine.trigger_count(TriggerKey::MissingComponent(id(7))), 1);
    }
}
