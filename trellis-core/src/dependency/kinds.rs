//! Dependency Kinds
//!
//! Each kind is a target-discovery strategy behind the [`TargetDiscovery`]
//! trait. Discovery is pure: it looks at the tree and the attached
//! components and reports either the targets it found or what it is
//! waiting for, plus the structural keys whose change should re-run it.
//! Registering blockers and triggers is the engine's job.
//!
//! A strategy that cannot finish yet never fails. It returns
//! [`Discovery::Blocked`] naming components that do not exist yet or
//! composites that have not expanded. Under a forced retry the searches
//! that walk children or replacements accept a partial answer instead:
//! unexpanded composites are skipped (or taken as leaves when flattening
//! replacements) and missing children are left out.

use serde_json::Value;

use super::definition::TargetOptions;
use crate::config::EngineConfig;
use crate::graph::{ComponentId, GraphStore, TriggerKey, VarName};
use crate::host::{ChildSlot, ComponentTree, LinkKind};

/// What discovery is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    /// A component that is not attached yet.
    Component(ComponentId),

    /// A composite that has not expanded yet.
    Expansion(ComponentId),
}

/// Result of one discovery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    Found {
        targets: Vec<ComponentId>,

        /// Value derived directly from structure or configuration, for
        /// kinds that have no target variables.
        computed: Option<Value>,

        triggers: Vec<TriggerKey>,
    },
    Blocked {
        waits: Vec<Wait>,
        triggers: Vec<TriggerKey>,
    },
}

impl Discovery {
    fn found(targets: Vec<ComponentId>, triggers: Vec<TriggerKey>) -> Self {
        Discovery::Found {
            targets,
            computed: None,
            triggers,
        }
    }

    fn computed(value: Value, triggers: Vec<TriggerKey>) -> Self {
        Discovery::Found {
            targets: Vec::new(),
            computed: Some(value),
            triggers,
        }
    }

    fn missing(component: ComponentId) -> Self {
        Discovery::Blocked {
            waits: vec![Wait::Component(component)],
            triggers: vec![TriggerKey::MissingComponent(component)],
        }
    }

    /// Found if nothing is being waited on, otherwise blocked.
    fn collect(targets: Vec<ComponentId>, waits: Vec<Wait>, mut triggers: Vec<TriggerKey>) -> Self {
        if waits.is_empty() {
            return Discovery::found(targets, triggers);
        }
        for wait in &waits {
            if let Wait::Component(id) = wait {
                triggers.push(TriggerKey::MissingComponent(*id));
            }
        }
        Discovery::Blocked { waits, triggers }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Discovery::Found { .. })
    }

    pub fn triggers(&self) -> &[TriggerKey] {
        match self {
            Discovery::Found { triggers, .. } | Discovery::Blocked { triggers, .. } => triggers,
        }
    }
}

/// Everything a strategy may look at.
pub struct DiscoveryContext<'a> {
    pub tree: &'a dyn ComponentTree,
    pub store: &'a GraphStore,
    pub config: &'a EngineConfig,
    pub owner: ComponentId,
    pub requested: &'a [VarName],
    pub options: &'a TargetOptions,

    /// Accept partial answers instead of waiting.
    pub force: bool,
}

impl DiscoveryContext<'_> {
    /// Whether a component exists in the tree and is attached to the engine.
    pub fn is_attached(&self, id: ComponentId) -> bool {
        self.tree.component_type(id).is_some() && self.store.contains_component(id)
    }

    fn inherits(&self, id: ComponentId, base: &str) -> bool {
        self.tree
            .component_type(id)
            .is_some_and(|component_type| self.tree.is_inherited_type(component_type, base))
    }

    fn is_composite(&self, id: ComponentId) -> bool {
        self.tree
            .component_type(id)
            .is_some_and(|component_type| self.tree.is_composite_type(component_type))
    }

    fn has_requested_variables(&self, id: ComponentId) -> bool {
        let options = self.options.match_options();
        self.requested
            .iter()
            .all(|name| self.tree.map_variable_name(id, name.as_str(), options).is_some())
    }
}

/// A target-discovery strategy.
pub trait TargetDiscovery {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery;
}

/// The closed set of dependency kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyKind {
    StateVariable(StateVariableRef),
    ComponentIdentity(StateVariableRef),
    Child(ChildGroupRef),
    Descendant(DescendantSearch),
    Parent(ParentRef),
    Ancestor(AncestorSearch),
    Replacement(ReplacementRef),
    Link(LinkRef),
    CountAmongSiblings(SiblingCount),
    Value(Constant),
    Flag(FlagRef),

    /// Synthetic edge over the variables a two-phase state variable
    /// determines its dependencies from.
    DetermineDependencies(DeterminingVariables),
}

impl DependencyKind {
    /// Tag used in declarations and diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            DependencyKind::StateVariable(_) => "stateVariable",
            DependencyKind::ComponentIdentity(_) => "componentIdentity",
            DependencyKind::Child(_) => "child",
            DependencyKind::Descendant(_) => "descendant",
            DependencyKind::Parent(_) => "parentStateVariable",
            DependencyKind::Ancestor(_) => "ancestor",
            DependencyKind::Replacement(_) => "replacement",
            DependencyKind::Link(link) => match link.link {
                LinkKind::ShadowSource => "shadowSource",
                LinkKind::AdapterSource => "adapterSource",
                LinkKind::SourceComposite => "sourceComposite",
            },
            DependencyKind::CountAmongSiblings(_) => "countAmongSiblings",
            DependencyKind::Value(_) => "value",
            DependencyKind::Flag(_) => "flag",
            DependencyKind::DetermineDependencies(_) => "determineDependencies",
        }
    }

    /// Whether the kind yields one value computed during discovery rather
    /// than target variables.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            DependencyKind::CountAmongSiblings(_)
                | DependencyKind::Value(_)
                | DependencyKind::Flag(_)
        )
    }
}

impl TargetDiscovery for DependencyKind {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        match self {
            DependencyKind::StateVariable(kind) | DependencyKind::ComponentIdentity(kind) => {
                kind.discover(cx)
            }
            DependencyKind::Child(kind) => kind.discover(cx),
            DependencyKind::Descendant(kind) => kind.discover(cx),
            DependencyKind::Parent(kind) => kind.discover(cx),
            DependencyKind::Ancestor(kind) => kind.discover(cx),
            DependencyKind::Replacement(kind) => kind.discover(cx),
            DependencyKind::Link(kind) => kind.discover(cx),
            DependencyKind::CountAmongSiblings(kind) => kind.discover(cx),
            DependencyKind::Value(kind) => kind.discover(cx),
            DependencyKind::Flag(kind) => kind.discover(cx),
            DependencyKind::DetermineDependencies(kind) => kind.discover(cx),
        }
    }
}

/// A component by explicit id, defaulting to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariableRef {
    pub component: Option<ComponentId>,
}

impl TargetDiscovery for StateVariableRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let component = self.component.unwrap_or(cx.owner);
        if !cx.is_attached(component) {
            return Discovery::missing(component);
        }
        Discovery::found(vec![component], Vec::new())
    }
}

/// Active children of a parent that belong to any of the named groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildGroupRef {
    pub parent: Option<ComponentId>,
    pub groups: Vec<String>,
}

impl TargetDiscovery for ChildGroupRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let parent = self.parent.unwrap_or(cx.owner);
        let Some(children) = cx
            .tree
            .active_children(parent)
            .filter(|_| cx.is_attached(parent))
        else {
            return Discovery::missing(parent);
        };
        let triggers = vec![TriggerKey::Parent(parent)];

        let mut targets = Vec::new();
        let mut waits = Vec::new();
        for slot in children {
            match slot {
                ChildSlot::Component(child) => {
                    let matched = self
                        .groups
                        .iter()
                        .any(|group| cx.tree.matches_child_group(parent, group, child));
                    if !matched {
                        continue;
                    }
                    if cx.is_attached(child) {
                        targets.push(child);
                    } else if !cx.force {
                        waits.push(Wait::Component(child));
                    }
                }
                ChildSlot::Unexpanded(composite) => {
                    if !cx.force {
                        waits.push(Wait::Expansion(composite));
                    }
                }
            }
        }
        Discovery::collect(targets, waits, triggers)
    }
}

/// Descendants of an ancestor whose type matches any of the given types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescendantSearch {
    pub ancestor: Option<ComponentId>,
    pub component_types: Vec<String>,
    pub recurse_to_matched_children: bool,
}

impl DescendantSearch {
    fn walk(
        &self,
        cx: &DiscoveryContext<'_>,
        parent: ComponentId,
        targets: &mut Vec<ComponentId>,
        waits: &mut Vec<Wait>,
    ) {
        let Some(children) = cx.tree.active_children(parent) else {
            return;
        };
        for slot in children {
            match slot {
                ChildSlot::Component(child) => {
                    if !cx.is_attached(child) {
                        if !cx.force {
                            waits.push(Wait::Component(child));
                        }
                        continue;
                    }
                    let matched = self.component_types.iter().any(|base| cx.inherits(child, base));
                    if matched {
                        targets.push(child);
                    }
                    if !matched || self.recurse_to_matched_children {
                        self.walk(cx, child, targets, waits);
                    }
                }
                ChildSlot::Unexpanded(composite) => {
                    if !cx.force {
                        waits.push(Wait::Expansion(composite));
                    }
                }
            }
        }
    }
}

impl TargetDiscovery for DescendantSearch {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let ancestor = self.ancestor.unwrap_or(cx.owner);
        if !cx.is_attached(ancestor) {
            return Discovery::missing(ancestor);
        }
        let mut targets = Vec::new();
        let mut waits = Vec::new();
        self.walk(cx, ancestor, &mut targets, &mut waits);
        Discovery::collect(targets, waits, vec![TriggerKey::Ancestor(ancestor)])
    }
}

/// The owner's parent, optionally only if it has a given type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub component_type: Option<String>,
}

impl TargetDiscovery for ParentRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let triggers = vec![TriggerKey::AncestorsOf(cx.owner)];
        let Some(parent) = cx.tree.parent(cx.owner) else {
            return Discovery::found(Vec::new(), triggers);
        };
        if let Some(base) = &self.component_type {
            if !cx.inherits(parent, base) {
                return Discovery::found(Vec::new(), triggers);
            }
        }
        if !cx.is_attached(parent) {
            return Discovery::collect(Vec::new(), vec![Wait::Component(parent)], triggers);
        }
        Discovery::found(vec![parent], triggers)
    }
}

/// The nearest ancestor inheriting from `component_type` when one is given,
/// otherwise the nearest ancestor exposing every requested variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorSearch {
    pub component_type: Option<String>,
}

impl TargetDiscovery for AncestorSearch {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let triggers = vec![TriggerKey::AncestorsOf(cx.owner)];
        let found = cx.tree.ancestors(cx.owner).into_iter().find(|&ancestor| {
            match self.component_type.as_deref() {
                Some(base) => cx.inherits(ancestor, base),
                None => cx.has_requested_variables(ancestor),
            }
        });
        match found {
            None => Discovery::found(Vec::new(), triggers),
            Some(ancestor) if !cx.is_attached(ancestor) => {
                Discovery::collect(Vec::new(), vec![Wait::Component(ancestor)], triggers)
            }
            Some(ancestor) => Discovery::found(vec![ancestor], triggers),
        }
    }
}

/// Replacements of a composite, optionally flattened through nested
/// composites and optionally narrowed to one 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRef {
    pub composite: Option<ComponentId>,
    pub recursive: bool,
    pub index: Option<usize>,
}

impl ReplacementRef {
    fn flatten(
        &self,
        cx: &DiscoveryContext<'_>,
        composite: ComponentId,
        targets: &mut Vec<ComponentId>,
        waits: &mut Vec<Wait>,
        triggers: &mut Vec<TriggerKey>,
    ) {
        triggers.push(TriggerKey::Composite(composite));
        let Some(replacements) = cx.tree.replacements(composite) else {
            if !cx.force {
                waits.push(Wait::Expansion(composite));
            }
            return;
        };
        for replacement in replacements {
            if !cx.is_attached(replacement) {
                if !cx.force {
                    waits.push(Wait::Component(replacement));
                }
                continue;
            }
            if self.recursive && cx.is_composite(replacement) {
                if cx.tree.replacements(replacement).is_none() && cx.force {
                    // Unexpanded nested composite stands in for its replacements
                    triggers.push(TriggerKey::Composite(replacement));
                    targets.push(replacement);
                    continue;
                }
                self.flatten(cx, replacement, targets, waits, triggers);
            } else {
                targets.push(replacement);
            }
        }
    }
}

impl TargetDiscovery for ReplacementRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let composite = self.composite.unwrap_or(cx.owner);
        if !cx.is_attached(composite) {
            return Discovery::missing(composite);
        }
        let mut targets = Vec::new();
        let mut waits = Vec::new();
        let mut triggers = Vec::new();
        self.flatten(cx, composite, &mut targets, &mut waits, &mut triggers);

        if let Some(index) = self.index {
            targets = targets.get(index - 1).copied().into_iter().collect();
        }
        Discovery::collect(targets, waits, triggers)
    }
}

/// The other end of a dynamic-origin link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    pub link: LinkKind,
    pub component: Option<ComponentId>,
}

impl TargetDiscovery for LinkRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let component = self.component.unwrap_or(cx.owner);
        match cx.tree.link(component, self.link) {
            None => Discovery::found(Vec::new(), Vec::new()),
            Some(target) if !cx.is_attached(target) => Discovery::missing(target),
            Some(target) => Discovery::found(vec![target], Vec::new()),
        }
    }
}

/// 1-based position of the owner among its parent's matching children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingCount {
    pub component_type: Option<String>,
}

impl TargetDiscovery for SiblingCount {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let Some(parent) = cx.tree.parent(cx.owner) else {
            return Discovery::computed(Value::from(1), Vec::new());
        };
        let triggers = vec![TriggerKey::Counter(parent)];
        let base = self
            .component_type
            .clone()
            .or_else(|| cx.tree.component_type(cx.owner).map(str::to_owned));
        let Some(children) = cx.tree.active_children(parent) else {
            return Discovery::computed(Value::from(1), triggers);
        };

        let mut count = 0usize;
        for slot in children {
            match slot {
                ChildSlot::Component(child) => {
                    let counted = base.as_deref().map_or(true, |base| cx.inherits(child, base));
                    if counted {
                        count += 1;
                    }
                    if child == cx.owner {
                        return Discovery::computed(Value::from(count.max(1)), triggers);
                    }
                }
                ChildSlot::Unexpanded(composite) => {
                    if !cx.force {
                        return Discovery::Blocked {
                            waits: vec![Wait::Expansion(composite)],
                            triggers,
                        };
                    }
                }
            }
        }
        Discovery::computed(Value::from(count + 1), triggers)
    }
}

/// A constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub value: Value,
}

impl TargetDiscovery for Constant {
    fn discover(&self, _cx: &DiscoveryContext<'_>) -> Discovery {
        Discovery::computed(self.value.clone(), Vec::new())
    }
}

/// A document-level flag from the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagRef {
    pub name: String,
}

impl TargetDiscovery for FlagRef {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        let value = cx.config.flag(&self.name).cloned().unwrap_or(Value::Null);
        Discovery::computed(value, Vec::new())
    }
}

/// The owner's own variables that a two-phase specification reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminingVariables {
    pub variables: Vec<VarName>,
}

impl TargetDiscovery for DeterminingVariables {
    fn discover(&self, cx: &DiscoveryContext<'_>) -> Discovery {
        Discovery::found(vec![cx.owner], Vec::new())
    }
}
