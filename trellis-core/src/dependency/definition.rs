//! Dependency Definitions
//!
//! A state variable's specification maps edge names to definition objects.
//! A definition carries a `dependencyType` tag and whatever fields that
//! kind reads. Definitions deserialize from JSON with camelCase keys, and
//! can be built in Rust with the constructors below.
//!
//! Definitions are loose records on purpose: validation happens when an
//! edge is initialized ([`DependencyDefinition::set_up_parameters`]), so a
//! malformed definition is reported against the exact component, state
//! variable and edge that declared it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::kinds::{
    AncestorSearch, ChildGroupRef, Constant, DependencyKind, DescendantSearch, FlagRef, LinkRef,
    ParentRef, ReplacementRef, SiblingCount, StateVariableRef,
};
use crate::error::{Error, Result};
use crate::graph::{ComponentId, EdgeName, VarName};
use crate::host::{LinkKind, MatchOptions};

/// Declared definition of one dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencyDefinition {
    pub dependency_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_idx: Option<ComponentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_idx: Option<ComponentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ancestor_idx: Option<ComponentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_idx: Option<ComponentId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<VarName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_names: Option<Vec<VarName>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_types: Option<Vec<String>>,
    pub recurse_to_matched_children: bool,

    pub recursive_replacements: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_name: Option<String>,

    pub variables_optional: bool,
    pub case_insensitive_variable_match: bool,
    pub public_state_variables_only: bool,
    pub use_mapped_variable_names: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prop_index: Option<Vec<usize>>,
    pub return_array_size: bool,
    pub return_single_component: bool,
}

/// How targets' variables are mapped and how values are shaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetOptions {
    pub variables_optional: bool,
    pub case_insensitive: bool,
    pub public_only: bool,
    pub use_mapped_names: bool,
    pub prop_index: Option<Vec<usize>>,
    pub array_size: bool,
    pub single_component: bool,
}

impl TargetOptions {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_insensitive: self.case_insensitive,
            public_only: self.public_only,
        }
    }
}

/// Validated, kind-specific parameters of a definition.
#[derive(Debug, Clone)]
pub(crate) struct Parameters {
    pub kind: DependencyKind,
    pub requested: SmallVec<[VarName; 2]>,
    pub options: TargetOptions,
}

impl DependencyDefinition {
    /// A definition of the given kind with no fields set.
    pub fn new(dependency_type: impl Into<String>) -> Self {
        Self {
            dependency_type: dependency_type.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A state variable of this component (use [`of`](Self::of) for another).
    pub fn state_variable(name: impl Into<VarName>) -> Self {
        Self::new("stateVariable").variable(name)
    }

    /// The identity of a component.
    pub fn component_identity(component: ComponentId) -> Self {
        Self::new("componentIdentity").of(component)
    }

    /// Children of this component in the given child groups.
    pub fn child<G, V>(groups: G, variables: V) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<VarName>,
    {
        Self {
            child_groups: Some(groups.into_iter().map(Into::into).collect()),
            ..Self::new("child")
        }
        .variables(variables)
    }

    /// Descendants of this component of the given types.
    pub fn descendant<T, V>(component_types: T, variables: V) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<VarName>,
    {
        Self {
            component_types: Some(component_types.into_iter().map(Into::into).collect()),
            ..Self::new("descendant")
        }
        .variables(variables)
    }

    /// A state variable of the parent.
    pub fn parent_state_variable(name: impl Into<VarName>) -> Self {
        Self::new("parentStateVariable").variable(name)
    }

    /// The nearest ancestor of the given type. The variables are read from it
    /// but take no part in the search.
    pub fn ancestor_of_type<V>(component_type: impl Into<String>, variables: V) -> Self
    where
        V: IntoIterator,
        V::Item: Into<VarName>,
    {
        Self {
            component_type: Some(component_type.into()),
            ..Self::new("ancestor")
        }
        .variables(variables)
    }

    /// The nearest ancestor exposing all of the given variables.
    pub fn ancestor_with<V>(variables: V) -> Self
    where
        V: IntoIterator,
        V::Item: Into<VarName>,
    {
        Self::new("ancestor").variables(variables)
    }

    /// Replacements of a composite.
    pub fn replacement(composite: ComponentId) -> Self {
        Self {
            composite_idx: Some(composite),
            ..Self::new("replacement")
        }
    }

    /// The component on the other end of a dynamic-origin link.
    pub fn link(kind: LinkKind) -> Self {
        let tag = match kind {
            LinkKind::ShadowSource => "shadowSource",
            LinkKind::AdapterSource => "adapterSource",
            LinkKind::SourceComposite => "sourceComposite",
        };
        Self::new(tag)
    }

    /// 1-based position of this component among matching siblings.
    pub fn count_among_siblings() -> Self {
        Self::new("countAmongSiblings")
    }

    /// A constant.
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new("value")
        }
    }

    /// A document flag.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            flag_name: Some(name.into()),
            ..Self::new("flag")
        }
    }

    pub fn of(mut self, component: ComponentId) -> Self {
        self.component_idx = Some(component);
        self
    }

    pub fn of_parent(mut self, parent: ComponentId) -> Self {
        self.parent_idx = Some(parent);
        self
    }

    pub fn in_ancestor(mut self, ancestor: ComponentId) -> Self {
        self.ancestor_idx = Some(ancestor);
        self
    }

    pub fn of_type(mut self, component_type: impl Into<String>) -> Self {
        self.component_type = Some(component_type.into());
        self
    }

    pub fn variable(mut self, name: impl Into<VarName>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    pub fn variables<V>(mut self, names: V) -> Self
    where
        V: IntoIterator,
        V::Item: Into<VarName>,
    {
        let names: Vec<VarName> = names.into_iter().map(Into::into).collect();
        self.variable_names = if names.is_empty() { None } else { Some(names) };
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive_replacements = true;
        self
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.replacement_index = Some(index);
        self
    }

    pub fn recurse_to_matched_children(mut self) -> Self {
        self.recurse_to_matched_children = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.variables_optional = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive_variable_match = true;
        self
    }

    pub fn public_only(mut self) -> Self {
        self.public_state_variables_only = true;
        self
    }

    pub fn mapped_names(mut self) -> Self {
        self.use_mapped_variable_names = true;
        self
    }

    pub fn prop_index(mut self, index: Vec<usize>) -> Self {
        self.prop_index = Some(index);
        self
    }

    pub fn array_size(mut self) -> Self {
        self.return_array_size = true;
        self
    }

    pub fn single_component(mut self) -> Self {
        self.return_single_component = true;
        self
    }

    /// Validate this definition and extract its kind-specific parameters.
    pub(crate) fn set_up_parameters(
        &self,
        component: ComponentId,
        state_variable: &VarName,
        dependency: &EdgeName,
    ) -> Result<Parameters> {
        let invalid =
            |reason: String| Error::invalid(component, state_variable, dependency, reason);

        let requested: SmallVec<[VarName; 2]> = match (&self.variable_name, &self.variable_names) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "specify either `variableName` or `variableNames`, not both".into(),
                ))
            }
            (Some(name), None) => SmallVec::from_elem(name.clone(), 1),
            (None, Some(names)) => names.iter().cloned().collect(),
            (None, None) => SmallVec::new(),
        };
        if let Some(empty) = requested.iter().find(|name| name.as_str().is_empty()) {
            return Err(invalid(format!("empty variable name {empty:?}")));
        }

        let require_variables = |kind: &str| {
            if requested.is_empty() {
                Err(invalid(format!(
                    "`{kind}` dependency requires `variableName` or `variableNames`"
                )))
            } else {
                Ok(())
            }
        };
        let forbid_variables = |kind: &str| {
            if requested.is_empty() {
                Ok(())
            } else {
                Err(invalid(format!("`{kind}` dependency does not take variable names")))
            }
        };

        let kind = match self.dependency_type.as_str() {
            "stateVariable" => {
                require_variables("stateVariable")?;
                DependencyKind::StateVariable(StateVariableRef {
                    component: self.component_idx,
                })
            }
            "componentIdentity" => {
                forbid_variables("componentIdentity")?;
                DependencyKind::ComponentIdentity(StateVariableRef {
                    component: self.component_idx,
                })
            }
            "child" => {
                let groups = self
                    .child_groups
                    .clone()
                    .filter(|groups| !groups.is_empty())
                    .ok_or_else(|| {
                        invalid("`child` dependency requires non-empty `childGroups`".into())
                    })?;
                DependencyKind::Child(ChildGroupRef {
                    parent: self.parent_idx,
                    groups,
                })
            }
            "descendant" => {
                let component_types = self
                    .component_types
                    .clone()
                    .filter(|types| !types.is_empty())
                    .ok_or_else(|| {
                        invalid("`descendant` dependency needs non-empty `componentTypes`".into())
                    })?;
                DependencyKind::Descendant(DescendantSearch {
                    ancestor: self.ancestor_idx,
                    component_types,
                    recurse_to_matched_children: self.recurse_to_matched_children,
                })
            }
            "parentStateVariable" => {
                if requested.len() != 1 {
                    return Err(invalid(
                        "`parentStateVariable` dependency requires exactly one variable".into(),
                    ));
                }
                DependencyKind::Parent(ParentRef {
                    component_type: self.component_type.clone(),
                })
            }
            "ancestor" => {
                if self.component_type.is_none() && requested.is_empty() {
                    return Err(invalid(
                        "`ancestor` dependency requires `componentType` or `variableNames`".into(),
                    ));
                }
                DependencyKind::Ancestor(AncestorSearch {
                    component_type: self.component_type.clone(),
                })
            }
            "replacement" => {
                if self.replacement_index == Some(0) {
                    return Err(invalid("`replacementIndex` is 1-based".into()));
                }
                DependencyKind::Replacement(ReplacementRef {
                    composite: self.composite_idx,
                    recursive: self.recursive_replacements,
                    index: self.replacement_index,
                })
            }
            "shadowSource" | "adapterSource" | "sourceComposite" => {
                let link = match self.dependency_type.as_str() {
                    "shadowSource" => LinkKind::ShadowSource,
                    "adapterSource" => LinkKind::AdapterSource,
                    _ => LinkKind::SourceComposite,
                };
                DependencyKind::Link(LinkRef {
                    link,
                    component: self.component_idx,
                })
            }
            "countAmongSiblings" => {
                forbid_variables("countAmongSiblings")?;
                DependencyKind::CountAmongSiblings(SiblingCount {
                    component_type: self.component_type.clone(),
                })
            }
            "value" => {
                forbid_variables("value")?;
                DependencyKind::Value(Constant {
                    value: self.value.clone().unwrap_or(Value::Null),
                })
            }
            "flag" => {
                forbid_variables("flag")?;
                let name = self
                    .flag_name
                    .clone()
                    .ok_or_else(|| invalid("`flag` dependency requires `flagName`".into()))?;
                DependencyKind::Flag(FlagRef { name })
            }
            "determineDependencies" => {
                return Err(invalid(
                    "`determineDependencies` is engine-internal and cannot be declared".into(),
                ))
            }
            "" => return Err(invalid("missing `dependencyType`".into())),
            other => return Err(invalid(format!("unknown dependency type `{other}`"))),
        };

        if let Some(index) = &self.prop_index {
            if index.is_empty() || index.contains(&0) {
                return Err(invalid("`propIndex` entries are 1-based and may not be empty".into()));
            }
        }

        Ok(Parameters {
            kind,
            requested,
            options: TargetOptions {
                variables_optional: self.variables_optional,
                case_insensitive: self.case_insensitive_variable_match,
                public_only: self.public_state_variables_only,
                use_mapped_names: self.use_mapped_variable_names,
                prop_index: self.prop_index.clone(),
                array_size: self.return_array_size,
                single_component: self.return_single_component,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_up(definition: &DependencyDefinition) -> Result<Parameters> {
        let (component, state_variable) = (ComponentId::new(1), VarName::from("value"));
        definition.set_up_parameters(component, &state_variable, &EdgeName::from("dep"))
    }

    #[test]
    fn parses_camel_case_json() {
        let definition = DependencyDefinition::from_json(
            r#"{
                "dependencyType": "stateVariable",
                "componentIdx": 4,
                "variableName": "value",
                "variablesOptional": true
            }"#,
        )
        .unwrap();
        assert_eq!(definition.dependency_type, "stateVariable");
        assert_eq!(definition.component_idx, Some(ComponentId::new(4)));
        assert_eq!(definition.variable_name, Some(VarName::from("value")));
        assert!(definition.variables_optional);

        let parameters = set_up(&definition).unwrap();
        assert!(matches!(
            parameters.kind,
            DependencyKind::StateVariable(StateVariableRef { component: Some(id) })
                if id == ComponentId::new(4)
        ));
        assert_eq!(parameters.requested.as_slice(), &[VarName::from("value")]);
        assert!(parameters.options.variables_optional);
    }

    #[test]
    fn builder_matches_json() {
        let built = DependencyDefinition::child(["points"], ["x", "y"]).optional();
        let parsed = DependencyDefinition::from_json(
            r#"{
                "dependencyType": "child",
                "childGroups": ["points"],
                "variableNames": ["x", "y"],
                "variablesOptional": true
            }"#,
        )
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = set_up(&DependencyDefinition::new("telepathy")).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unknown dependency type `telepathy`"));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = set_up(&DependencyDefinition::new("stateVariable")).unwrap_err();
        assert!(err.to_string().contains("requires `variableName`"));

        let err = set_up(&DependencyDefinition::new("child")).unwrap_err();
        assert!(err.to_string().contains("childGroups"));

        let err = set_up(&DependencyDefinition::new("flag")).unwrap_err();
        assert!(err.to_string().contains("flagName"));

        let err = set_up(&DependencyDefinition::new("")).unwrap_err();
        assert!(err.to_string().contains("missing `dependencyType`"));
    }

    #[test]
    fn conflicting_or_malformed_fields_are_rejected() {
        let mut definition = DependencyDefinition::state_variable("x");
        definition.variable_names = Some(vec![VarName::from("y")]);
        assert!(set_up(&definition).is_err());

        let definition = DependencyDefinition::state_variable("xs").prop_index(vec![0]);
        assert!(set_up(&definition).is_err());

        let definition = DependencyDefinition::replacement(ComponentId::new(2)).at_index(0);
        assert!(set_up(&definition).is_err());

        let definition = DependencyDefinition::value(3).variables(["x"]);
        assert!(set_up(&definition).is_err());
    }

    #[test]
    fn engine_only_kind_cannot_be_declared() {
        let err = set_up(&DependencyDefinition::new("determineDependencies")).unwrap_err();
        assert!(err.to_string().contains("cannot be declared"));
    }

    #[test]
    fn options_are_extracted() {
        let definition = DependencyDefinition::state_variable("Value")
            .case_insensitive()
            .public_only()
            .mapped_names()
            .single_component();
        let options = set_up(&definition).unwrap().options;
        assert!(options.case_insensitive);
        assert!(options.public_only);
        assert!(options.use_mapped_names);
        assert!(options.single_component);
        assert_eq!(
            options.match_options(),
            MatchOptions {
                case_insensitive: true,
                public_only: true
            }
        );
    }
}
