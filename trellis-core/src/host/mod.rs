//! Component Tree Collaborator
//!
//! The engine never owns components. Everything it needs to know about the
//! document tree, and every side effect it needs the tree to perform, goes
//! through the [`ComponentTree`] trait defined here.
//!
//! The engine calls into the tree to:
//!
//! - look up structure (types, parents, ordered active children, composite
//!   replacements, shadow/adapter/source links)
//! - describe a component's state variables and return their dependency
//!   specifications
//! - map requested variable names (aliases, case-insensitive matching,
//!   public-only filtering, array entries)
//! - compute and cache values, and hear about values going stale
//! - expand composites and report non-fatal warnings
//!
//! [`MemoryTree`] is an in-memory implementation used by the tests and
//! benchmarks.

mod memory;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dependency::{DependencyDefinition, DependencyValues};
use crate::error::Result;
use crate::graph::{ComponentId, EdgeName, VarName};

pub use memory::{ComponentSpec, MemoryTree, VarDef};

/// Values of the variables a two-phase state variable determines its
/// dependencies from.
pub type DeterminingValues = IndexMap<VarName, Value>;

/// One position in a parent's ordered list of active children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildSlot {
    /// A concrete child.
    Component(ComponentId),

    /// A composite child that has not expanded yet. Its eventual
    /// replacements will occupy this position.
    Unexpanded(ComponentId),
}

/// A dynamic-origin link from one component to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkKind {
    /// The component this one shadows.
    ShadowSource,

    /// The component this one was adapted from.
    AdapterSource,

    /// The composite whose replacements include this component.
    SourceComposite,
}

/// Where a component was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

/// How to match a requested variable name against a target's variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub case_insensitive: bool,
    pub public_only: bool,
}

/// Description of a state variable group as declared by a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariableDescription {
    /// The primary variable.
    pub name: VarName,

    /// Variables computed together with the primary.
    pub additional: Vec<VarName>,

    pub public: bool,
    pub is_array: bool,
    pub is_array_entry: bool,
}

impl StateVariableDescription {
    pub fn new(name: impl Into<VarName>) -> Self {
        Self {
            name: name.into(),
            additional: Vec::new(),
            public: false,
            is_array: false,
            is_array_entry: false,
        }
    }

    /// Every member of the group, primary first.
    pub fn members(&self) -> impl Iterator<Item = &VarName> {
        std::iter::once(&self.name).chain(self.additional.iter())
    }
}

/// What a state variable's specification function returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    /// The dependencies of the variable, keyed by edge name.
    Dependencies(IndexMap<EdgeName, DependencyDefinition>),

    /// The dependencies depend on the values of these other variables of
    /// the same component. The function will be called again with their
    /// values once they resolve.
    DetermineFrom(Vec<VarName>),
}

impl Specification {
    /// A specification with no dependencies.
    pub fn none() -> Self {
        Specification::Dependencies(IndexMap::new())
    }

    /// Build a specification from (edge name, definition) pairs.
    pub fn of<I, N>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = (N, DependencyDefinition)>,
        N: Into<EdgeName>,
    {
        Specification::Dependencies(
            dependencies
                .into_iter()
                .map(|(name, definition)| (name.into(), definition))
                .collect(),
        )
    }
}

/// Find the declared variable a requested name refers to. An exact match
/// wins over a case-insensitive one.
pub fn match_variable_name(
    descriptions: &[StateVariableDescription],
    requested: &str,
    options: MatchOptions,
) -> Option<VarName> {
    let candidates = descriptions
        .iter()
        .filter(|description| !options.public_only || description.public)
        .flat_map(StateVariableDescription::members);
    let mut folded = None;
    for name in candidates {
        if name.as_str() == requested {
            return Some(name.clone());
        }
        if options.case_insensitive
            && folded.is_none()
            && name.as_str().eq_ignore_ascii_case(requested)
        {
            folded = Some(name.clone());
        }
    }
    folded
}

/// The owning document tree, as seen by the engine.
pub trait ComponentTree {
    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Type of a component, or `None` if it does not exist.
    fn component_type(&self, id: ComponentId) -> Option<&str>;

    fn parent(&self, id: ComponentId) -> Option<ComponentId>;

    /// Ancestors of a component, nearest first.
    fn ancestors(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            ancestors.push(ancestor);
            current = self.parent(ancestor);
        }
        ancestors
    }

    /// Ordered active children, with expanded composites replaced by their
    /// replacements. `None` if the parent does not exist.
    fn active_children(&self, parent: ComponentId) -> Option<Vec<ChildSlot>>;

    /// Whether `child` belongs to the named child group of `parent`.
    fn matches_child_group(&self, parent: ComponentId, group: &str, child: ComponentId) -> bool;

    /// Whether `component_type` is `base` or inherits from it.
    fn is_inherited_type(&self, component_type: &str, base: &str) -> bool {
        component_type == base
    }

    /// Whether components of this type are composites.
    fn is_composite_type(&self, component_type: &str) -> bool;

    /// Current replacements of a composite, or `None` if it has not expanded.
    fn replacements(&self, composite: ComponentId) -> Option<Vec<ComponentId>>;

    /// State variables of a composite that must resolve before it may expand.
    fn expansion_prerequisites(&self, _composite: ComponentId) -> Vec<VarName> {
        Vec::new()
    }

    /// Expand a composite. Returns the components created, or `None` if
    /// the composite cannot expand yet.
    fn expand_composite(&mut self, composite: ComponentId) -> Result<Option<Vec<ComponentId>>>;

    fn link(&self, _id: ComponentId, _kind: LinkKind) -> Option<ComponentId> {
        None
    }

    fn source_position(&self, _id: ComponentId) -> Option<SourcePosition> {
        None
    }

    // ------------------------------------------------------------------
    // State variables
    // ------------------------------------------------------------------

    /// State variable groups of a component, in declaration order.
    fn state_variables(&self, id: ComponentId) -> Vec<StateVariableDescription>;

    /// Map a requested variable name to the name of an existing variable,
    /// applying alias substitution and the match options.
    fn map_variable_name(
        &self,
        id: ComponentId,
        requested: &str,
        options: MatchOptions,
    ) -> Option<VarName> {
        match_variable_name(&self.state_variables(id), requested, options)
    }

    /// Name of the entry of an array variable at a 1-based index path.
    fn array_entry_name(
        &self,
        _id: ComponentId,
        _array: &VarName,
        _index: &[usize],
    ) -> Option<VarName> {
        None
    }

    /// Name of the variable holding the size of an array variable.
    fn array_size_variable(&self, _id: ComponentId, _array: &VarName) -> Option<VarName> {
        None
    }

    /// Synthesize an array-entry variable on demand.
    fn create_array_entry(
        &mut self,
        _id: ComponentId,
        _name: &str,
    ) -> Option<StateVariableDescription> {
        None
    }

    /// The dependency specification of a state variable group. For a
    /// two-phase variable `determining` carries the values of the variables
    /// it asked to be determined from.
    fn dependency_specification(
        &self,
        id: ComponentId,
        state_variable: &VarName,
        determining: Option<&DeterminingValues>,
    ) -> Result<Specification>;

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Compute and cache the value of a state variable from its
    /// dependency values.
    fn compute_value(
        &mut self,
        id: ComponentId,
        state_variable: &VarName,
        dependencies: &DependencyValues,
    ) -> Result<Value>;

    /// The last value computed for a state variable, if any.
    fn cached_value(&self, id: ComponentId, state_variable: &VarName) -> Option<Value>;

    /// Whether the cached value came from a default rather than data.
    fn used_default(&self, _id: ComponentId, _state_variable: &VarName) -> bool {
        false
    }

    /// A state variable's value is no longer current.
    fn mark_stale(&mut self, _id: ComponentId, _state_variable: &VarName) {}

    /// Report a non-fatal problem with the document.
    fn warn(&mut self, message: &str) {
        tracing::warn!(warning = message, "document warning");
    }
}
