//! Dependencies
//!
//! A [`Dependency`] is one named, directed edge from a state variable group
//! to a dynamically discovered list of targets. This module holds the edge
//! itself and its lifecycle state; the engine drives the lifecycle:
//!
//! ```text
//! uninitialized --discover--> ready | blocked
//!      ready | blocked --structural change / retry--> ready | blocked
//!      any --delete--> gone
//! ```
//!
//! - [`definition`]: the declarative surface, validated into parameters
//! - [`kinds`]: the target-discovery strategy of every kind
//! - [`value`]: the shapes values are projected into

pub mod definition;
pub mod kinds;
pub mod value;

use indexmap::IndexSet;
use serde_json::Value;
use smallvec::{smallvec, SmallVec};

use crate::config::EngineConfig;
use crate::graph::{ComponentId, EdgeName, StateVarKey, UpstreamSlot, VarName};

pub use definition::{DependencyDefinition, TargetOptions};
pub use kinds::{DependencyKind, Discovery, DiscoveryContext, TargetDiscovery, Wait};
pub use value::{ComponentValues, DependencyValue, DependencyValues, EdgeChanges};

pub(crate) use definition::Parameters;

/// Name of the synthetic edge created for a two-phase state variable.
pub const DETERMINE_DEPENDENCIES: &str = "__determine_dependencies";

/// Where an edge is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePhase {
    Uninitialized,

    /// Discovery is waiting on a missing component or an unexpanded
    /// composite.
    Blocked,

    /// Targets are materialized.
    Ready,
}

/// One materialized target of an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub component: ComponentId,
    pub component_type: String,

    /// Mapped name of each requested variable, in request order. `None`
    /// where an optional variable does not exist on the target.
    pub variables: SmallVec<[Option<VarName>; 2]>,

    /// One slot per requested variable.
    changed: SmallVec<[bool; 2]>,
}

impl Target {
    pub fn new(
        component: ComponentId,
        component_type: impl Into<String>,
        variables: SmallVec<[Option<VarName>; 2]>,
    ) -> Self {
        let changed = smallvec![true; variables.len()];
        Self {
            component,
            component_type: component_type.into(),
            variables,
            changed,
        }
    }

    pub fn changed(&self) -> &[bool] {
        &self.changed
    }

    fn same_identity(&self, other: &Target) -> bool {
        self.component == other.component && self.variables == other.variables
    }
}

/// A named edge owned by a state variable group.
#[derive(Debug, Clone)]
pub struct Dependency {
    name: EdgeName,
    owner: ComponentId,

    /// Primary variable of the owning group.
    state_variable: VarName,

    kind: DependencyKind,
    requested: SmallVec<[VarName; 2]>,
    options: TargetOptions,

    /// `None` for the synthetic determine-dependencies edge.
    definition: Option<DependencyDefinition>,

    phase: EdgePhase,
    targets: Vec<Target>,
    computed: Option<Value>,
    targets_changed: bool,
    computed_changed: bool,
}

impl Dependency {
    pub(crate) fn new(
        name: EdgeName,
        owner: ComponentId,
        state_variable: VarName,
        parameters: Parameters,
        definition: Option<DependencyDefinition>,
    ) -> Self {
        Self {
            name,
            owner,
            state_variable,
            kind: parameters.kind,
            requested: parameters.requested,
            options: parameters.options,
            definition,
            phase: EdgePhase::Uninitialized,
            targets: Vec::new(),
            computed: None,
            targets_changed: true,
            computed_changed: true,
        }
    }

    /// The synthetic edge over a two-phase variable's determining variables.
    pub(crate) fn determination(
        owner: ComponentId,
        state_variable: VarName,
        variables: Vec<VarName>,
    ) -> Self {
        let parameters = Parameters {
            requested: variables.iter().cloned().collect(),
            kind: DependencyKind::DetermineDependencies(kinds::DeterminingVariables { variables }),
            options: TargetOptions::default(),
        };
        Self::new(EdgeName::from(DETERMINE_DEPENDENCIES), owner, state_variable, parameters, None)
    }

    pub fn name(&self) -> &EdgeName {
        &self.name
    }

    pub fn owner(&self) -> ComponentId {
        self.owner
    }

    pub fn state_variable(&self) -> &VarName {
        &self.state_variable
    }

    pub fn kind(&self) -> &DependencyKind {
        &self.kind
    }

    pub fn requested(&self) -> &[VarName] {
        &self.requested
    }

    pub fn options(&self) -> &TargetOptions {
        &self.options
    }

    pub fn definition(&self) -> Option<&DependencyDefinition> {
        self.definition.as_ref()
    }

    pub fn phase(&self) -> EdgePhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: EdgePhase) {
        self.phase = phase;
    }

    pub fn is_determination(&self) -> bool {
        matches!(self.kind, DependencyKind::DetermineDependencies(_))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn computed(&self) -> Option<&Value> {
        self.computed.as_ref()
    }

    /// Target components, in order.
    pub fn target_components(&self) -> Vec<ComponentId> {
        self.targets.iter().map(|target| target.component).collect()
    }

    /// Every (component, variable) this edge reads, without duplicates.
    pub fn target_keys(&self) -> Vec<StateVarKey> {
        let keys: IndexSet<StateVarKey> = self
            .targets
            .iter()
            .flat_map(|target| {
                target
                    .variables
                    .iter()
                    .flatten()
                    .map(move |name| StateVarKey::new(target.component, name.clone()))
            })
            .collect();
        keys.into_iter().collect()
    }

    /// Where the edge is indexed on its targets' side. A target with no
    /// mapped variables is indexed by identity.
    pub fn upstream_slots(&self) -> Vec<(ComponentId, UpstreamSlot)> {
        let mut slots: IndexSet<(ComponentId, UpstreamSlot)> = IndexSet::new();
        for target in &self.targets {
            let mut any = false;
            for name in target.variables.iter().flatten() {
                slots.insert((target.component, UpstreamSlot::Variable(name.clone())));
                any = true;
            }
            if !any {
                slots.insert((target.component, UpstreamSlot::Identity));
            }
        }
        slots.into_iter().collect()
    }

    /// Replace the target list, keeping the change flags of targets whose
    /// identity survives. Returns whether the list changed.
    pub(crate) fn replace_targets(&mut self, targets: Vec<Target>) -> bool {
        let changed = self.targets.len() != targets.len()
            || self
                .targets
                .iter()
                .zip(&targets)
                .any(|(old, new)| !old.same_identity(new));

        let mut previous = std::mem::take(&mut self.targets);
        self.targets = targets
            .into_iter()
            .map(|mut target| {
                if let Some(position) = previous.iter().position(|old| old.same_identity(&target)) {
                    target.changed = previous.swap_remove(position).changed;
                }
                target
            })
            .collect();

        if changed {
            self.targets_changed = true;
        }
        changed
    }

    /// Returns whether the computed value changed.
    pub(crate) fn set_computed(&mut self, computed: Option<Value>) -> bool {
        if self.computed == computed {
            return false;
        }
        self.computed = computed;
        self.computed_changed = true;
        true
    }

    /// Mark every slot reading `component.name` as changed.
    pub(crate) fn flag_changed(&mut self, component: ComponentId, name: &str) -> bool {
        let mut flagged = false;
        for target in self.targets.iter_mut().filter(|target| target.component == component) {
            for (slot, variable) in target.variables.iter().enumerate() {
                if variable.as_ref().is_some_and(|variable| variable == name) {
                    target.changed[slot] = true;
                    flagged = true;
                }
            }
        }
        flagged
    }

    /// Read and clear the change flags.
    pub(crate) fn take_changes(&mut self) -> EdgeChanges {
        let values_changed = if self.kind.is_computed() {
            vec![smallvec![self.computed_changed]]
        } else {
            self.targets.iter().map(|target| target.changed.clone()).collect()
        };
        let changes = EdgeChanges {
            targets_changed: self.targets_changed,
            values_changed,
        };
        self.targets_changed = false;
        self.computed_changed = false;
        for target in &mut self.targets {
            target.changed.iter_mut().for_each(|changed| *changed = false);
        }
        changes
    }

    /// Project the current target values into the shape the owner reads.
    ///
    /// `lookup` returns a target variable's value and whether it came from
    /// a default. The second element of the result is the used-default flag
    /// of the projection.
    pub(crate) fn project<F>(&self, config: &EngineConfig, lookup: F) -> (DependencyValue, bool)
    where
        F: Fn(ComponentId, &VarName) -> (Value, bool),
    {
        let bundle = |target: &Target| {
            let values = self
                .requested
                .iter()
                .zip(&target.variables)
                .filter_map(|(requested, mapped)| {
                    let mapped = mapped.as_ref()?;
                    let key = if self.options.use_mapped_names { mapped } else { requested };
                    Some((key.clone(), lookup(target.component, mapped).0))
                })
                .collect();
            ComponentValues {
                component: target.component,
                component_type: target.component_type.clone(),
                values,
            }
        };

        match &self.kind {
            DependencyKind::Value(_) | DependencyKind::CountAmongSiblings(_) => {
                (DependencyValue::Single(self.computed.clone().unwrap_or(Value::Null)), false)
            }
            DependencyKind::Flag(flag) => {
                let value = self
                    .computed
                    .clone()
                    .or_else(|| config.flag(&flag.name).cloned())
                    .unwrap_or(Value::Null);
                (DependencyValue::Single(value), false)
            }
            DependencyKind::StateVariable(_) | DependencyKind::Parent(_)
                if self.requested.len() == 1 && !self.options.single_component =>
            {
                let single = self.targets.first().and_then(|target| {
                    let name = target.variables.first()?.clone()?;
                    Some((target.component, name))
                });
                match single {
                    Some((component, name)) => {
                        let (value, used_default) = lookup(component, &name);
                        (DependencyValue::Single(value), used_default)
                    }
                    None => (DependencyValue::Single(Value::Null), false),
                }
            }
            DependencyKind::StateVariable(_)
            | DependencyKind::Parent(_)
            | DependencyKind::ComponentIdentity(_)
            | DependencyKind::Ancestor(_)
            | DependencyKind::Link(_) => {
                (DependencyValue::Component(self.targets.first().map(bundle)), false)
            }
            DependencyKind::Child(_)
            | DependencyKind::Descendant(_)
            | DependencyKind::Replacement(_)
            | DependencyKind::DetermineDependencies(_) => {
                if self.options.single_component {
                    (DependencyValue::Component(self.targets.first().map(bundle)), false)
                } else {
                    (DependencyValue::Components(self.targets.iter().map(bundle).collect()), false)
                }
            }
        }
    }
}
