//! Graph Nodes
//!
//! This module defines the identifiers and per-variable records that live
//! in the dependency graph. Components are owned by the component tree;
//! the engine only keeps a record per attached component listing its state
//! variables and their resolution status.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

/// Stable identity of a component in the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Wrap a raw component index.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ComponentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(Arc::from(name.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(Arc::from(name))
            }
        }

        impl From<&String> for $name {
            fn from(name: &String) -> Self {
                Self::new(name)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                &*self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                &*self.0 == *other
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&*self.0, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self::from)
            }
        }
    };
}

name_type!(
    /// Name of a state variable on a component.
    VarName
);

name_type!(
    /// Name of a dependency, unique within the state variable group that owns it.
    EdgeName
);

/// A (component, state variable) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateVarKey {
    pub component: ComponentId,
    pub name: VarName,
}

impl StateVarKey {
    pub fn new(component: ComponentId, name: impl Into<VarName>) -> Self {
        Self {
            component,
            name: name.into(),
        }
    }
}

impl fmt::Display for StateVarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.name)
    }
}

/// Resolution status of a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The variable has never been resolved.
    NeverComputed,

    /// The variable was resolved once but a blocker has since been
    /// registered on it. Its last value is retained until re-verified.
    Stale,

    /// Every blocker has cleared. The value is safe to read.
    Fresh,
}

/// Engine-side bookkeeping for one state variable.
#[derive(Debug, Clone)]
pub struct StateVarRecord {
    resolution: Resolution,

    /// Set the first time the variable resolves. Never reverts.
    ever_resolved: bool,

    /// Guards against re-entrant resolution of the same variable.
    resolving: bool,

    /// Whether the host's cached value was computed after the last stale
    /// notification.
    value_fresh: bool,

    /// First variable of the group this variable is defined with.
    primary: VarName,

    public: bool,
    is_array: bool,
    is_array_entry: bool,
}

impl StateVarRecord {
    pub(crate) fn new(primary: VarName) -> Self {
        Self {
            resolution: Resolution::NeverComputed,
            ever_resolved: false,
            resolving: false,
            value_fresh: false,
            primary,
            public: false,
            is_array: false,
            is_array_entry: false,
        }
    }

    pub(crate) fn with_flags(mut self, public: bool, is_array: bool, is_array_entry: bool) -> Self {
        self.public = public;
        self.is_array = is_array;
        self.is_array_entry = is_array_entry;
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution == Resolution::Fresh
    }

    pub fn ever_resolved(&self) -> bool {
        self.ever_resolved
    }

    pub fn is_resolving(&self) -> bool {
        self.resolving
    }

    pub fn value_fresh(&self) -> bool {
        self.value_fresh
    }

    pub fn primary(&self) -> &VarName {
        &self.primary
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    pub fn is_array_entry(&self) -> bool {
        self.is_array_entry
    }

    pub(crate) fn mark_resolved(&mut self) {
        self.resolution = Resolution::Fresh;
        self.ever_resolved = true;
    }

    /// Record that a blocker now applies. Returns `true` if this moved a
    /// fresh variable to stale.
    pub(crate) fn mark_blocked(&mut self) -> bool {
        if self.resolution == Resolution::Fresh {
            self.resolution = Resolution::Stale;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_resolving(&mut self, resolving: bool) {
        self.resolving = resolving;
    }

    pub(crate) fn set_value_fresh(&mut self, fresh: bool) {
        self.value_fresh = fresh;
    }
}

/// Engine-side bookkeeping for one attached component.
#[derive(Debug, Clone, Default)]
pub struct ComponentRecord {
    component_type: String,

    /// Every state variable, in declaration order.
    variables: IndexMap<VarName, StateVarRecord>,

    /// Primary variable of each group mapped to all members of the group.
    groups: IndexMap<VarName, SmallVec<[VarName; 2]>>,
}

impl ComponentRecord {
    pub(crate) fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            variables: IndexMap::new(),
            groups: IndexMap::new(),
        }
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    /// Add a group of variables defined together. The first is the primary.
    pub(crate) fn add_group(&mut self, members: SmallVec<[VarName; 2]>, flags: (bool, bool, bool)) {
        let Some(primary) = members.first().cloned() else {
            return;
        };
        for member in &members {
            let record = StateVarRecord::new(primary.clone()).with_flags(flags.0, flags.1, flags.2);
            self.variables.insert(member.clone(), record);
        }
        self.groups.insert(primary, members);
    }

    pub fn variable(&self, name: &str) -> Option<&StateVarRecord> {
        self.variables.get(name)
    }

    pub(crate) fn variable_mut(&mut self, name: &str) -> Option<&mut StateVarRecord> {
        self.variables.get_mut(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&VarName, &StateVarRecord)> {
        self.variables.iter()
    }

    /// Primary variables, in declaration order.
    pub fn primaries(&self) -> impl Iterator<Item = &VarName> {
        self.groups.keys()
    }

    /// All members of the group whose primary is `primary`.
    pub fn group(&self, primary: &str) -> Option<&[VarName]> {
        self.groups.get(primary).map(|members| members.as_slice())
    }

    /// All members of the group containing `name`.
    pub fn group_of(&self, name: &str) -> Option<&[VarName]> {
        let primary = self.variables.get(name)?.primary();
        self.group(primary.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn names_compare_with_str() {
        let name = VarName::from("value");
        assert_eq!(name, "value");
        assert_eq!(name.as_str(), "value");
        assert_eq!(format!("{name:?}"), "\"value\"");
    }

    #[test]
    fn component_ids_display_with_hash() {
        assert_eq!(ComponentId::new(7).to_string(), "#7");
        assert_eq!(StateVarKey::new(ComponentId::new(7), "x").to_string(), "#7.x");
    }

    #[test]
    fn new_record_is_never_computed() {
        let record = StateVarRecord::new(VarName::from("x"));
        assert_eq!(record.resolution(), Resolution::NeverComputed);
        assert!(!record.ever_resolved());
        assert!(!record.value_fresh());
    }

    #[test]
    fn resolution_transitions() {
        let mut record = StateVarRecord::new(VarName::from("x"));

        // Blocking a never-computed variable leaves it never-computed
        assert!(!record.mark_blocked());
        assert_eq!(record.resolution(), Resolution::NeverComputed);

        record.mark_resolved();
        assert_eq!(record.resolution(), Resolution::Fresh);
        assert!(record.ever_resolved());

        // Fresh -> stale keeps the ever-resolved flag
        assert!(record.mark_blocked());
        assert_eq!(record.resolution(), Resolution::Stale);
        assert!(record.ever_resolved());

        // A second blocker is not a transition
        assert!(!record.mark_blocked());

        record.mark_resolved();
        assert!(record.is_resolved());
    }

    #[test]
    fn groups_share_a_primary() {
        let mut component = ComponentRecord::new("point");
        let point = smallvec![VarName::from("x"), VarName::from("y")];
        component.add_group(point, (true, false, false));
        component.add_group(smallvec![VarName::from("label")], (true, false, false));

        assert_eq!(component.component_type(), "point");
        assert_eq!(component.variable("y").unwrap().primary(), "x");
        assert_eq!(component.group_of("y").unwrap().len(), 2);
        let primaries: Vec<_> = component.primaries().map(|p| p.as_str()).collect();
        assert_eq!(primaries, vec!["x", "label"]);
    }
}
