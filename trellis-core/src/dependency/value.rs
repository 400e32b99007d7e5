//! Dependency Values
//!
//! The shapes a state variable's compute function receives: one
//! [`DependencyValue`] per edge, plus the change and used-default flags
//! collected when the values were read.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::graph::{ComponentId, EdgeName, VarName};

/// Values read from one target component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentValues {
    pub component: ComponentId,
    pub component_type: String,

    /// Keyed by the requested variable name, or by the mapped name when
    /// the dependency asked for mapped names.
    pub values: IndexMap<VarName, Value>,
}

impl ComponentValues {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// The projected value of one dependency.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyValue {
    /// One target, one variable, unwrapped. Also used by kinds that
    /// compute their value directly.
    Single(Value),

    /// At most one target component.
    Component(Option<ComponentValues>),

    /// Every target component, in target order.
    Components(Vec<ComponentValues>),
}

impl DependencyValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            DependencyValue::Single(value) => Some(value),
            _ => None,
        }
    }

    pub fn component(&self) -> Option<&ComponentValues> {
        match self {
            DependencyValue::Component(component) => component.as_ref(),
            DependencyValue::Components(components) => components.first(),
            DependencyValue::Single(_) => None,
        }
    }

    pub fn components(&self) -> &[ComponentValues] {
        match self {
            DependencyValue::Component(Some(component)) => std::slice::from_ref(component),
            DependencyValue::Components(components) => components,
            _ => &[],
        }
    }

    /// Plain JSON rendering, for hosts that store values as JSON.
    pub fn to_json(&self) -> Value {
        match self {
            DependencyValue::Single(value) => value.clone(),
            DependencyValue::Component(None) => Value::Null,
            DependencyValue::Component(Some(component)) => {
                serde_json::to_value(component).unwrap_or(Value::Null)
            }
            DependencyValue::Components(components) => {
                serde_json::to_value(components).unwrap_or_else(|_| Value::Array(Vec::new()))
            }
        }
    }
}

/// What changed on one edge since it was last read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeChanges {
    /// The target list itself changed.
    pub targets_changed: bool,

    /// Per target, per requested variable.
    pub values_changed: Vec<SmallVec<[bool; 2]>>,
}

impl EdgeChanges {
    pub fn any(&self) -> bool {
        self.targets_changed || self.values_changed.iter().flatten().any(|changed| *changed)
    }
}

/// Aggregated dependency values of a state variable, keyed by edge name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyValues {
    values: IndexMap<EdgeName, DependencyValue>,
    changes: IndexMap<EdgeName, EdgeChanges>,
    used_default: IndexMap<EdgeName, bool>,
}

impl DependencyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        name: EdgeName,
        value: DependencyValue,
        changes: EdgeChanges,
        used_default: bool,
    ) {
        self.changes.insert(name.clone(), changes);
        self.used_default.insert(name.clone(), used_default);
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&DependencyValue> {
        self.values.get(name)
    }

    /// The unwrapped value of a single-valued edge.
    pub fn single(&self, name: &str) -> Option<&Value> {
        self.get(name)?.as_value()
    }

    /// The component bundles of an edge, empty if it has none.
    pub fn components(&self, name: &str) -> &[ComponentValues] {
        self.get(name).map_or(&[], DependencyValue::components)
    }

    pub fn changes(&self, name: &str) -> Option<&EdgeChanges> {
        self.changes.get(name)
    }

    pub fn changed(&self, name: &str) -> bool {
        self.changes(name).is_some_and(EdgeChanges::any)
    }

    pub fn used_default(&self, name: &str) -> bool {
        self.used_default.get(name).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EdgeName, &DependencyValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every edge as a JSON object member.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smallvec::smallvec;

    fn bundle(id: u32, x: i64) -> ComponentValues {
        ComponentValues {
            component: ComponentId::new(id),
            component_type: "point".into(),
            values: IndexMap::from([(VarName::from("x"), json!(x))]),
        }
    }

    #[test]
    fn accessors_follow_shape() {
        let mut values = DependencyValues::new();
        values.insert("n".into(), DependencyValue::Single(json!(3)), EdgeChanges::default(), true);
        values.insert(
            "points".into(),
            DependencyValue::Components(vec![bundle(2, 1), bundle(3, 4)]),
            EdgeChanges {
                targets_changed: false,
                values_changed: vec![smallvec![false], smallvec![true]],
            },
            false,
        );

        assert_eq!(values.single("n"), Some(&json!(3)));
        assert!(values.used_default("n"));
        assert!(!values.changed("n"));
        assert_eq!(values.components("points").len(), 2);
        assert_eq!(values.components("points")[1].get("x"), Some(&json!(4)));
        assert!(values.changed("points"));
        assert!(values.single("points").is_none());
        assert!(values.components("missing").is_empty());
    }

    #[test]
    fn renders_as_json() {
        let mut values = DependencyValues::new();
        let mut put = |name: &str, value| {
            values.insert(name.into(), value, EdgeChanges::default(), false);
        };
        put("n", DependencyValue::Single(json!(3)));
        put("p", DependencyValue::Component(Some(bundle(2, 7))));
        put("q", DependencyValue::Component(None));

        assert_eq!(
            values.to_json(),
            json!({
                "n": 3,
                "p": {"component": 2, "componentType": "point", "values": {"x": 7}},
                "q": null
            })
        );
    }
}
