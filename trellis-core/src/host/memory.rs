//! In-memory component tree.
//!
//! [`MemoryTree`] keeps components, their state variable definitions and
//! their cached values in plain maps. State variables are defined with
//! closures ([`VarDef`]); components are described with [`ComponentSpec`]
//! builders, which may carry authored children and, for composites, a
//! replacement template that is instantiated on expansion.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    match_variable_name, ChildSlot, ComponentTree, DeterminingValues, LinkKind, MatchOptions,
    SourcePosition, Specification, StateVariableDescription,
};
use crate::dependency::{DependencyDefinition, DependencyValues};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::graph::{ComponentId, StateVarKey, VarName};

type SpecifyFn = Arc<dyn Fn(Option<&DeterminingValues>) -> Specification + Send + Sync>;
type ComputeFn = Arc<dyn Fn(&DependencyValues) -> Value + Send + Sync>;

/// Definition of one state variable group.
#[derive(Clone)]
pub struct VarDef {
    description: StateVariableDescription,
    specify: SpecifyFn,

    /// `None` for essential variables, whose value is stored on the
    /// component.
    compute: Option<ComputeFn>,

    default: Value,
    size_variable: Option<VarName>,
}

impl fmt::Debug for VarDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarDef")
            .field("description", &self.description)
            .field("essential", &self.compute.is_none())
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl VarDef {
    /// A variable holding a value set directly on the component.
    pub fn essential(name: impl Into<VarName>, default: impl Into<Value>) -> Self {
        Self {
            description: StateVariableDescription::new(name),
            specify: Arc::new(|_| Specification::none()),
            compute: None,
            default: default.into(),
            size_variable: None,
        }
    }

    /// A variable computed from a fixed set of dependencies.
    pub fn computed<F>(name: impl Into<VarName>, specification: Specification, compute: F) -> Self
    where
        F: Fn(&DependencyValues) -> Value + Send + Sync + 'static,
    {
        Self {
            description: StateVariableDescription::new(name),
            specify: Arc::new(move |_| specification.clone()),
            compute: Some(Arc::new(compute)),
            default: Value::Null,
            size_variable: None,
        }
    }

    /// A variable whose dependencies depend on the values of `from`.
    pub fn determined<I, N, S, F>(name: impl Into<VarName>, from: I, specify: S, compute: F) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<VarName>,
        S: Fn(&DeterminingValues) -> Specification + Send + Sync + 'static,
        F: Fn(&DependencyValues) -> Value + Send + Sync + 'static,
    {
        let from: Vec<VarName> = from.into_iter().map(Into::into).collect();
        Self {
            description: StateVariableDescription::new(name),
            specify: Arc::new(move |determining| match determining {
                None => Specification::DetermineFrom(from.clone()),
                Some(values) => specify(values),
            }),
            compute: Some(Arc::new(compute)),
            default: Value::Null,
            size_variable: None,
        }
    }

    pub fn public(mut self) -> Self {
        self.description.public = true;
        self
    }

    /// Variables computed together with this one.
    pub fn with_additional<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<VarName>,
    {
        self.description.additional = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this variable as an array whose size is held by `size_variable`.
    /// Entries are addressed as the array name followed by a 1-based index.
    pub fn array(mut self, size_variable: impl Into<VarName>) -> Self {
        self.description.is_array = true;
        self.size_variable = Some(size_variable.into());
        self
    }

    pub fn name(&self) -> &VarName {
        &self.description.name
    }

    fn defines(&self, name: &str) -> bool {
        self.description.members().any(|member| member == name)
    }
}

/// Builder for a component and its authored subtree.
#[derive(Debug, Clone, Default)]
pub struct ComponentSpec {
    component_type: String,
    variables: Vec<VarDef>,
    aliases: IndexMap<String, VarName>,
    links: IndexMap<LinkKind, ComponentId>,
    position: Option<SourcePosition>,
    children: Vec<ComponentSpec>,
    template: Option<Vec<ComponentSpec>>,
    prerequisites: Vec<VarName>,
}

impl ComponentSpec {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    pub fn variable(mut self, definition: VarDef) -> Self {
        self.variables.push(definition);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<VarName>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn link(mut self, kind: LinkKind, target: ComponentId) -> Self {
        self.links.insert(kind, target);
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = Some(SourcePosition { line, column });
        self
    }

    pub fn child(mut self, child: ComponentSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Components created when this composite expands.
    pub fn replaced_by(mut self, replacements: Vec<ComponentSpec>) -> Self {
        self.template = Some(replacements);
        self
    }

    /// Variables that must resolve before this composite may expand.
    pub fn expands_after<I, N>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<VarName>,
    {
        self.prerequisites = variables.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug)]
struct Node {
    component_type: String,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    variables: Vec<VarDef>,
    aliases: IndexMap<String, VarName>,
    links: IndexMap<LinkKind, ComponentId>,
    position: Option<SourcePosition>,
    template: Option<Vec<ComponentSpec>>,
    replacements: Option<Vec<ComponentId>>,
    prerequisites: Vec<VarName>,
    essential: IndexMap<VarName, Value>,
    hold_expansion: bool,
}

impl Node {
    fn definition(&self, name: &str) -> Option<&VarDef> {
        self.variables.iter().find(|definition| definition.defines(name))
    }
}

/// A component tree held in memory.
#[derive(Debug, Default)]
pub struct MemoryTree {
    nodes: HashMap<ComponentId, Node>,
    next_id: u32,
    base_types: HashMap<String, String>,
    composite_types: HashSet<String>,
    child_groups: HashMap<String, Vec<String>>,
    values: HashMap<StateVarKey, Value>,
    stale_calls: HashMap<StateVarKey, usize>,
    compute_calls: HashMap<StateVarKey, usize>,
    warnings: Vec<String>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `derived` inherits from `base`.
    pub fn with_inheritance(mut self, derived: impl Into<String>, base: impl Into<String>) -> Self {
        self.base_types.insert(derived.into(), base.into());
        self
    }

    pub fn with_composite_type(mut self, component_type: impl Into<String>) -> Self {
        self.composite_types.insert(component_type.into());
        self
    }

    /// Declare a child group matching children of the given types.
    pub fn with_child_group<I, T>(mut self, group: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.child_groups
            .insert(group.into(), types.into_iter().map(Into::into).collect());
        self
    }

    /// Insert a component under an explicit id. Authored children get fresh
    /// ids. Returns every id created, the component's first.
    pub fn insert(
        &mut self,
        id: ComponentId,
        parent: Option<ComponentId>,
        spec: ComponentSpec,
    ) -> Vec<ComponentId> {
        self.next_id = self.next_id.max(id.raw() + 1);
        let mut created = Vec::new();
        self.build(id, parent, spec, true, &mut created);
        created
    }

    /// Insert a component under a fresh id.
    pub fn add(&mut self, parent: Option<ComponentId>, spec: ComponentSpec) -> ComponentId {
        let id = self.fresh_id();
        self.insert(id, parent, spec);
        id
    }

    fn fresh_id(&mut self) -> ComponentId {
        let id = ComponentId::new(self.next_id.max(1));
        self.next_id = id.raw() + 1;
        id
    }

    fn build(
        &mut self,
        id: ComponentId,
        parent: Option<ComponentId>,
        spec: ComponentSpec,
        authored: bool,
        created: &mut Vec<ComponentId>,
    ) {
        if authored {
            if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
                parent.children.push(id);
            }
        }
        self.nodes.insert(
            id,
            Node {
                component_type: spec.component_type,
                parent,
                children: Vec::new(),
                variables: spec.variables,
                aliases: spec.aliases,
                links: spec.links,
                position: spec.position,
                template: spec.template,
                replacements: None,
                prerequisites: spec.prerequisites,
                essential: IndexMap::new(),
                hold_expansion: false,
            },
        );
        created.push(id);
        for child in spec.children {
            let child_id = self.fresh_id();
            self.build(child_id, Some(id), child, true, created);
        }
    }

    /// Remove a component with its children and replacements. Returns the
    /// removed ids.
    pub fn remove(&mut self, id: ComponentId) -> Vec<ComponentId> {
        if let Some(parent) = self.nodes.get(&id).and_then(|node| node.parent) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.remove(&next) else {
                continue;
            };
            stack.extend(node.children.iter().copied());
            stack.extend(node.replacements.iter().flatten().copied());
            self.values.retain(|key, _| key.component != next);
            removed.push(next);
        }
        removed
    }

    /// Move a component, with its subtree, under a new parent.
    pub fn reparent(&mut self, id: ComponentId, parent: Option<ComponentId>) -> bool {
        let Some(previous) = self.nodes.get(&id).map(|node| node.parent) else {
            return false;
        };
        if let Some(node) = previous.and_then(|previous| self.nodes.get_mut(&previous)) {
            node.children.retain(|child| *child != id);
        }
        if let Some(node) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            node.children.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
        }
        true
    }

    /// Set an essential value. Returns `false` if there is no such
    /// component.
    pub fn set_essential(
        &mut self,
        id: ComponentId,
        name: impl Into<VarName>,
        value: impl Into<Value>,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        node.essential.insert(name.into(), value.into());
        true
    }

    /// Keep a composite from expanding until released.
    pub fn hold_expansion(&mut self, id: ComponentId, hold: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.hold_expansion = hold;
        }
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn value(&self, id: ComponentId, name: &str) -> Option<&Value> {
        self.values.get(&StateVarKey::new(id, name))
    }

    /// How many stale notifications a variable has received.
    pub fn stale_count(&self, id: ComponentId, name: &str) -> usize {
        self.stale_calls.get(&StateVarKey::new(id, name)).copied().unwrap_or(0)
    }

    /// How many times a variable has been computed.
    pub fn compute_count(&self, id: ComponentId, name: &str) -> usize {
        self.compute_calls.get(&StateVarKey::new(id, name)).copied().unwrap_or(0)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Attach every component to `engine`, then announce each of them.
    pub fn attach_all(&mut self, engine: &mut Engine) -> Result<()> {
        let ids = self.component_ids();
        for id in &ids {
            engine.attach_component(self, *id)?;
        }
        for id in ids {
            engine.component_created(self, id)?;
        }
        Ok(())
    }

    fn node(&self, id: ComponentId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::Host(format!("no component {id} in the tree")))
    }

    fn push_slots(&self, child: ComponentId, slots: &mut Vec<ChildSlot>) {
        let Some(node) = self.nodes.get(&child) else {
            return;
        };
        if !self.composite_types.contains(&node.component_type) {
            slots.push(ChildSlot::Component(child));
            return;
        }
        match &node.replacements {
            Some(replacements) => {
                for replacement in replacements {
                    self.push_slots(*replacement, slots);
                }
            }
            None => slots.push(ChildSlot::Unexpanded(child)),
        }
    }

    fn array_entry(&self, id: ComponentId, name: &str) -> Option<(VarDef, usize)> {
        let node = self.nodes.get(&id)?;
        node.variables.iter().find_map(|definition| {
            if !definition.description.is_array {
                return None;
            }
            let index: usize = name.strip_prefix(definition.name().as_str())?.parse().ok()?;
            (index > 0).then(|| (definition.clone(), index))
        })
    }
}

impl ComponentTree for MemoryTree {
    fn component_type(&self, id: ComponentId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.component_type.as_str())
    }

    fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.nodes.get(&id)?.parent
    }

    fn active_children(&self, parent: ComponentId) -> Option<Vec<ChildSlot>> {
        let node = self.nodes.get(&parent)?;
        let mut slots = Vec::new();
        for child in &node.children {
            self.push_slots(*child, &mut slots);
        }
        Some(slots)
    }

    fn matches_child_group(&self, _parent: ComponentId, group: &str, child: ComponentId) -> bool {
        let (Some(types), Some(child_type)) =
            (self.child_groups.get(group), self.component_type(child))
        else {
            return false;
        };
        types.iter().any(|base| self.is_inherited_type(child_type, base))
    }

    fn is_inherited_type(&self, component_type: &str, base: &str) -> bool {
        let mut current = Some(component_type);
        while let Some(candidate) = current {
            if candidate == base {
                return true;
            }
            current = self.base_types.get(candidate).map(String::as_str);
        }
        false
    }

    fn is_composite_type(&self, component_type: &str) -> bool {
        self.composite_types.contains(component_type)
    }

    fn replacements(&self, composite: ComponentId) -> Option<Vec<ComponentId>> {
        self.nodes.get(&composite)?.replacements.clone()
    }

    fn expansion_prerequisites(&self, composite: ComponentId) -> Vec<VarName> {
        self.nodes
            .get(&composite)
            .map(|node| node.prerequisites.clone())
            .unwrap_or_default()
    }

    fn expand_composite(&mut self, composite: ComponentId) -> Result<Option<Vec<ComponentId>>> {
        let node = self.node(composite)?;
        if node.replacements.is_some() {
            return Ok(Some(Vec::new()));
        }
        if node.hold_expansion {
            return Ok(None);
        }
        let parent = node.parent;
        let template = node.template.clone().unwrap_or_default();

        let mut created = Vec::new();
        let mut replacements = Vec::new();
        for spec in template {
            let id = self.fresh_id();
            let spec = spec.link(LinkKind::SourceComposite, composite);
            self.build(id, parent, spec, false, &mut created);
            replacements.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&composite) {
            node.replacements = Some(replacements);
        }
        Ok(Some(created))
    }

    fn link(&self, id: ComponentId, kind: LinkKind) -> Option<ComponentId> {
        self.nodes.get(&id)?.links.get(&kind).copied()
    }

    fn source_position(&self, id: ComponentId) -> Option<SourcePosition> {
        self.nodes.get(&id)?.position
    }

    fn state_variables(&self, id: ComponentId) -> Vec<StateVariableDescription> {
        self.nodes
            .get(&id)
            .map(|node| {
                node.variables
                    .iter()
                    .map(|definition| definition.description.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn map_variable_name(
        &self,
        id: ComponentId,
        requested: &str,
        options: MatchOptions,
    ) -> Option<VarName> {
        let node = self.nodes.get(&id)?;
        let requested = node.aliases.get(requested).map_or(requested, VarName::as_str);
        match_variable_name(&self.state_variables(id), requested, options)
    }

    fn array_entry_name(
        &self,
        id: ComponentId,
        array: &VarName,
        index: &[usize],
    ) -> Option<VarName> {
        let node = self.nodes.get(&id)?;
        let definition = node.definition(array.as_str())?;
        if !definition.description.is_array {
            return None;
        }
        let &[index] = index else {
            return None;
        };
        Some(VarName::from(format!("{array}{index}")))
    }

    fn array_size_variable(&self, id: ComponentId, array: &VarName) -> Option<VarName> {
        self.nodes.get(&id)?.definition(array.as_str())?.size_variable.clone()
    }

    fn create_array_entry(
        &mut self,
        id: ComponentId,
        name: &str,
    ) -> Option<StateVariableDescription> {
        let (array, index) = self.array_entry(id, name)?;
        let mut description = StateVariableDescription::new(name);
        description.public = array.description.public;
        description.is_array_entry = true;

        let reads_array = DependencyDefinition::state_variable(array.name().clone());
        let specification = Specification::of([("array", reads_array)]);
        let entry = VarDef {
            description: description.clone(),
            specify: Arc::new(move |_| specification.clone()),
            compute: Some(Arc::new(move |dependencies: &DependencyValues| {
                dependencies
                    .single("array")
                    .and_then(|array| array.get(index - 1))
                    .cloned()
                    .unwrap_or(Value::Null)
            })),
            default: Value::Null,
            size_variable: None,
        };
        self.nodes.get_mut(&id)?.variables.push(entry);
        Some(description)
    }

    fn dependency_specification(
        &self,
        id: ComponentId,
        state_variable: &VarName,
        determining: Option<&DeterminingValues>,
    ) -> Result<Specification> {
        let definition = self
            .node(id)?
            .variables
            .iter()
            .find(|definition| definition.name() == state_variable)
            .ok_or_else(|| {
                Error::Host(format!("{id} has no state variable group `{state_variable}`"))
            })?;
        Ok((definition.specify)(determining))
    }

    fn compute_value(
        &mut self,
        id: ComponentId,
        state_variable: &VarName,
        dependencies: &DependencyValues,
    ) -> Result<Value> {
        let node = self.node(id)?;
        let definition = node
            .definition(state_variable.as_str())
            .ok_or_else(|| Error::Host(format!("{id} has no state variable `{state_variable}`")))?;
        let value = match &definition.compute {
            Some(compute) => compute(dependencies),
            None => node
                .essential
                .get(state_variable)
                .cloned()
                .unwrap_or_else(|| definition.default.clone()),
        };

        let key = StateVarKey::new(id, state_variable.clone());
        *self.compute_calls.entry(key.clone()).or_default() += 1;
        self.values.insert(key, value.clone());
        Ok(value)
    }

    fn cached_value(&self, id: ComponentId, state_variable: &VarName) -> Option<Value> {
        self.values.get(&StateVarKey::new(id, state_variable.clone())).cloned()
    }

    fn used_default(&self, id: ComponentId, state_variable: &VarName) -> bool {
        self.nodes.get(&id).is_some_and(|node| {
            node.definition(state_variable.as_str())
                .is_some_and(|definition| definition.compute.is_none())
                && !node.essential.contains_key(state_variable)
        })
    }

    fn mark_stale(&mut self, id: ComponentId, state_variable: &VarName) {
        *self
            .stale_calls
            .entry(StateVarKey::new(id, state_variable.clone()))
            .or_default() += 1;
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!(warning = message, "document warning");
        self.warnings.push(message.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    #[test]
    fn expanded_composites_are_inlined_among_children() {
        let mut tree = MemoryTree::new().with_composite_type("repeat");
        tree.insert(id(1), None, ComponentSpec::new("graph"));
        tree.insert(
            id(2),
            Some(id(1)),
            ComponentSpec::new("repeat")
                .replaced_by(vec![ComponentSpec::new("point"), ComponentSpec::new("point")]),
        );
        tree.insert(id(3), Some(id(1)), ComponentSpec::new("line"));

        assert_eq!(
            tree.active_children(id(1)),
            Some(vec![ChildSlot::Unexpanded(id(2)), ChildSlot::Component(id(3))])
        );

        let created = tree.expand_composite(id(2)).unwrap().unwrap();
        assert_eq!(created, vec![id(4), id(5)]);
        assert_eq!(
            tree.active_children(id(1)),
            Some(vec![
                ChildSlot::Component(id(4)),
                ChildSlot::Component(id(5)),
                ChildSlot::Component(id(3)),
            ])
        );
        assert_eq!(tree.parent(id(4)), Some(id(1)));
        assert_eq!(tree.link(id(4), LinkKind::SourceComposite), Some(id(2)));
    }

    #[test]
    fn held_composites_do_not_expand() {
        let mut tree = MemoryTree::new().with_composite_type("copy");
        tree.insert(id(1), None, ComponentSpec::new("copy"));
        tree.hold_expansion(id(1), true);
        assert_eq!(tree.expand_composite(id(1)).unwrap(), None);
        tree.hold_expansion(id(1), false);
        assert_eq!(tree.expand_composite(id(1)).unwrap(), Some(Vec::new()));
        assert_eq!(tree.replacements(id(1)), Some(Vec::new()));
    }

    #[test]
    fn aliases_and_inheritance() {
        let mut tree = MemoryTree::new().with_inheritance("mathInput", "input");
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("mathInput")
                .variable(VarDef::essential("value", 0).public())
                .alias("val", "value"),
        );

        assert!(tree.is_inherited_type("mathInput", "input"));
        assert!(!tree.is_inherited_type("input", "mathInput"));
        assert_eq!(
            tree.map_variable_name(id(1), "val", MatchOptions::default()),
            Some(VarName::from("value"))
        );
        let folded = MatchOptions {
            case_insensitive: true,
            public_only: true,
        };
        assert_eq!(tree.map_variable_name(id(1), "VALUE", folded), Some(VarName::from("value")));
    }

    #[test]
    fn essential_values_report_defaults() {
        let mut tree = MemoryTree::new();
        let number = ComponentSpec::new("number").variable(VarDef::essential("value", 3));
        tree.insert(id(1), None, number);
        let name = VarName::from("value");

        assert_eq!(tree.compute_value(id(1), &name, &DependencyValues::new()).unwrap(), json!(3));
        assert!(tree.used_default(id(1), &name));

        tree.set_essential(id(1), "value", 8);
        assert_eq!(tree.compute_value(id(1), &name, &DependencyValues::new()).unwrap(), json!(8));
        assert!(!tree.used_default(id(1), &name));
        assert_eq!(tree.compute_count(id(1), "value"), 2);
    }

    #[test]
    fn array_entries_are_synthesized() {
        let mut tree = MemoryTree::new();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("sequence")
                .variable(VarDef::essential("xs", json!([4, 5])).array("n")),
        );
        let array = VarName::from("xs");

        assert_eq!(tree.array_entry_name(id(1), &array, &[2]), Some(VarName::from("xs2")));
        assert_eq!(tree.array_size_variable(id(1), &array), Some(VarName::from("n")));
        let entry = tree.create_array_entry(id(1), "xs2").unwrap();
        assert!(entry.is_array_entry);
        assert!(tree.create_array_entry(id(1), "xs0").is_none());
        assert!(tree.create_array_entry(id(1), "ys1").is_none());
    }

    #[test]
    fn removal_takes_the_subtree() {
        let mut tree = MemoryTree::new();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("section")
                .child(ComponentSpec::new("text").child(ComponentSpec::new("math"))),
        );
        assert_eq!(tree.component_ids(), vec![id(1), id(2), id(3)]);

        let mut removed = tree.remove(id(2));
        removed.sort();
        assert_eq!(removed, vec![id(2), id(3)]);
        assert_eq!(tree.active_children(id(1)), Some(Vec::new()));
    }
}
