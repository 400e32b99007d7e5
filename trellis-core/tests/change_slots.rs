//! Property-based tests for per-variable change tracking.
//!
//! Every target of an edge carries one change slot per requested variable,
//! whether the variable was declared, synthesized as an array entry, or is
//! an optional variable the target does not have.

use proptest::prelude::*;
use serde_json::{json, Value};

use trellis_core::{
    ComponentId, ComponentSpec, DependencyDefinition, Engine, MemoryTree, Specification, VarDef,
};

const NAMES: [&str; 8] = ["n", "xs", "xs1", "xs2", "xs3", "xs5", "absent", "missing"];

fn reader_of(requested: &[&str]) -> (MemoryTree, Engine) {
    let array = ComponentId::new(1);
    let mut tree = MemoryTree::new();
    tree.insert(
        array,
        None,
        ComponentSpec::new("sequence")
            .variable(VarDef::essential("n", 3))
            .variable(VarDef::essential("xs", json!([10, 20, 30])).array("n")),
    );
    tree.insert(
        ComponentId::new(2),
        None,
        ComponentSpec::new("text").variable(VarDef::computed(
            "v",
            Specification::of([(
                "source",
                DependencyDefinition::new("stateVariable")
                    .of(array)
                    .variables(requested.iter().copied())
                    .optional(),
            )]),
            |_| Value::Null,
        )),
    );
    let mut engine = Engine::default();
    tree.attach_all(&mut engine).unwrap();
    (tree, engine)
}

fn reads_array(name: &str) -> bool {
    name.starts_with("xs")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_requested_variable_has_a_change_slot(
        requested in proptest::sample::subsequence(NAMES.to_vec(), 1..=NAMES.len()).prop_shuffle()
    ) {
        let (mut tree, mut engine) = reader_of(&requested);
        let reader = ComponentId::new(2);

        let edge = engine.dependency(reader, "v", "source").unwrap();
        prop_assert_eq!(edge.requested().len(), requested.len());
        for target in edge.targets() {
            prop_assert_eq!(target.changed().len(), target.variables.len());
            prop_assert_eq!(target.variables.len(), requested.len());
            for (name, mapped) in requested.iter().zip(&target.variables) {
                // Declared names and array entries map, the rest stay empty
                prop_assert_eq!(mapped.is_some(), *name == "n" || reads_array(name));
            }
        }

        // First read reports everything as changed
        let first = engine.dependency_values(&mut tree, reader, "v").unwrap().unwrap();
        let changes = first.changes("source").unwrap();
        prop_assert!(changes.values_changed.iter().all(|slots| slots.len() == requested.len()));

        // Changing the array flags exactly the slots that read it
        tree.set_essential(ComponentId::new(1), "xs", json!([11, 21, 31]));
        engine.mark_stale(&mut tree, ComponentId::new(1), "xs").unwrap();
        let second = engine.dependency_values(&mut tree, reader, "v").unwrap().unwrap();
        let changes = second.changes("source").unwrap();
        prop_assert_eq!(changes.values_changed.len(), 1);
        for (name, changed) in requested.iter().zip(&changes.values_changed[0]) {
            prop_assert_eq!(*changed, reads_array(name));
        }
        prop_assert!(engine.is_consistent());
    }
}
