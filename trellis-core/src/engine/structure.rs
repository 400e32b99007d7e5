//! Structural change notifications.

use indexmap::IndexSet;
use tracing::debug;

use super::{Engine, Outcome};
use crate::error::Result;
use crate::graph::{ComponentId, DependencyId, Item, TriggerKey};
use crate::host::{ChildSlot, ComponentTree};

/// What to do with the edges a structural change affects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Block their owners on re-discovery, to run when next resolved.
    #[default]
    Block,

    /// Re-run discovery now.
    Resolve,
}

/// Keys fired when the active children of `parent` change.
fn child_keys(tree: &dyn ComponentTree, parent: ComponentId) -> Vec<TriggerKey> {
    let mut keys = vec![
        TriggerKey::Parent(parent),
        TriggerKey::Counter(parent),
        TriggerKey::Ancestor(parent),
    ];
    keys.extend(tree.ancestors(parent).into_iter().map(TriggerKey::Ancestor));
    keys
}

/// Keys fired when the replacements of `composite` change. Replacements
/// stand in the composite's place among its parent's children.
fn replacement_keys(tree: &dyn ComponentTree, composite: ComponentId) -> Vec<TriggerKey> {
    let mut keys = vec![TriggerKey::Composite(composite)];
    if let Some(parent) = tree.parent(composite) {
        keys.extend(child_keys(tree, parent));
    }
    keys
}

fn subtree(tree: &dyn ComponentTree, root: ComponentId) -> Vec<ComponentId> {
    let mut found = vec![root];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        for slot in tree.active_children(id).unwrap_or_default() {
            if let ChildSlot::Component(child) = slot {
                found.push(child);
                stack.push(child);
            }
        }
    }
    found
}

impl Engine {
    /// A component was added to the tree and attached. Retries every edge
    /// that was waiting for it.
    pub fn component_created(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self.announce(tree, id);
        self.guard(result)
    }

    /// The active children of `parent` changed.
    pub fn children_changed(
        &mut self,
        tree: &mut dyn ComponentTree,
        parent: ComponentId,
        mode: UpdateMode,
    ) -> Result<()> {
        self.ensure_live()?;
        let keys = child_keys(&*tree, parent);
        let result = self.update_triggered(tree, &keys, mode);
        self.guard(result)
    }

    /// The replacements of `composite` changed.
    pub fn replacements_changed(
        &mut self,
        tree: &mut dyn ComponentTree,
        composite: ComponentId,
        mode: UpdateMode,
    ) -> Result<()> {
        self.ensure_live()?;
        let keys = replacement_keys(&*tree, composite);
        let result = self.update_triggered(tree, &keys, mode);
        self.guard(result)
    }

    /// `id` moved, so the ancestor chain of its whole subtree changed.
    pub fn ancestors_changed(
        &mut self,
        tree: &mut dyn ComponentTree,
        id: ComponentId,
        mode: UpdateMode,
    ) -> Result<()> {
        self.ensure_live()?;
        let keys: Vec<TriggerKey> =
            subtree(&*tree, id).into_iter().map(TriggerKey::AncestorsOf).collect();
        let result = self.update_triggered(tree, &keys, mode);
        self.guard(result)
    }

    /// Sibling positions among the children of `parent` changed.
    pub fn counters_changed(
        &mut self,
        tree: &mut dyn ComponentTree,
        parent: ComponentId,
        mode: UpdateMode,
    ) -> Result<()> {
        self.ensure_live()?;
        let result = self.update_triggered(tree, &[TriggerKey::Counter(parent)], mode);
        self.guard(result)
    }

    fn announce(&mut self, tree: &mut dyn ComponentTree, id: ComponentId) -> Result<()> {
        self.warned_missing.remove(&id);
        let waiting = self.triggers.dependencies_for(TriggerKey::MissingComponent(id));
        debug!(component = %id, waiting = waiting.len(), "component created");
        for edge in waiting {
            self.recalculate_dependency(tree, edge, false)?;
        }
        self.release(tree, &Item::component_created(id))
    }

    fn update_triggered(
        &mut self,
        tree: &mut dyn ComponentTree,
        keys: &[TriggerKey],
        mode: UpdateMode,
    ) -> Result<()> {
        let edges: IndexSet<DependencyId> = keys
            .iter()
            .flat_map(|key| self.triggers.dependencies_for(*key))
            .collect();
        if edges.is_empty() {
            return Ok(());
        }
        debug!(edges = edges.len(), ?mode, "structure changed");

        for edge in edges {
            match mode {
                UpdateMode::Block => {
                    let Some(dependency) = self.store.edge(edge) else {
                        continue;
                    };
                    let recalc = Item::recalculate(
                        dependency.owner(),
                        dependency.state_variable().clone(),
                        dependency.name().clone(),
                    );
                    for owner in self.dependent_items(edge) {
                        self.block(owner, recalc.clone());
                    }
                }
                UpdateMode::Resolve => {
                    self.recalculate_dependency(tree, edge, false)?;
                }
            }
        }
        Ok(())
    }

    /// Expand a composite once its prerequisites have resolved, attach
    /// what it created and re-examine every edge that can see it.
    pub(super) fn expand(
        &mut self,
        tree: &mut dyn ComponentTree,
        composite: ComponentId,
    ) -> Result<Outcome> {
        let item = Item::expand_composite(composite);
        if tree.replacements(composite).is_some() {
            self.release(tree, &item)?;
            return Ok(Outcome::Resolved);
        }

        self.prepare_expansion(&*tree, composite);
        if self.is_blocked(&item) {
            return Ok(Outcome::NotYet);
        }
        let Some(created) = tree.expand_composite(composite)? else {
            debug!(composite = %composite, "composite not ready to expand");
            return Ok(Outcome::NotYet);
        };
        debug!(composite = %composite, created = created.len(), "expanded composite");

        for &id in &created {
            self.attach(tree, id)?;
        }
        for &id in &created {
            self.announce(tree, id)?;
        }
        let keys = replacement_keys(&*tree, composite);
        self.update_triggered(tree, &keys, UpdateMode::Block)?;
        self.release(tree, &item)?;
        Ok(Outcome::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyDefinition;
    use crate::host::{ComponentSpec, MemoryTree, Specification, VarDef};
    use serde_json::{json, Value};

    fn id(raw: u32) -> ComponentId {
        ComponentId::new(raw)
    }

    fn count_children() -> VarDef {
        VarDef::computed(
            "count",
            Specification::of([(
                "items",
                DependencyDefinition::child(["items"], Vec::<&str>::new()),
            )]),
            |dependencies| json!(dependencies.components("items").len()),
        )
    }

    fn item_tree() -> MemoryTree {
        MemoryTree::new()
            .with_composite_type("repeat")
            .with_child_group("items", ["item"])
    }

    #[test]
    fn block_mode_defers_rediscovery() {
        let mut tree = item_tree();
        tree.insert(id(1), None, ComponentSpec::new("list").variable(count_children()));
        tree.insert(id(2), Some(id(1)), ComponentSpec::new("item"));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert_eq!(engine.value(&mut tree, id(1), "count").unwrap(), Some(json!(1)));

        let added = tree.add(Some(id(1)), ComponentSpec::new("item"));
        engine.attach_component(&mut tree, added).unwrap();
        engine.component_created(&mut tree, added).unwrap();
        engine.children_changed(&mut tree, id(1), UpdateMode::Block).unwrap();

        let recalc = Item::recalculate(id(1), "count", "items");
        assert_eq!(engine.blockers_of(&Item::state_variable(id(1), "count")), vec![recalc]);
        assert_eq!(engine.value(&mut tree, id(1), "count").unwrap(), Some(json!(2)));
    }

    #[test]
    fn resolve_mode_rediscovers_immediately() {
        let mut tree = item_tree();
        tree.insert(id(1), None, ComponentSpec::new("list").variable(count_children()));
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert_eq!(engine.value(&mut tree, id(1), "count").unwrap(), Some(json!(0)));

        let added = tree.add(Some(id(1)), ComponentSpec::new("item"));
        engine.attach_component(&mut tree, added).unwrap();
        engine.children_changed(&mut tree, id(1), UpdateMode::Resolve).unwrap();

        let edge = engine.dependency(id(1), "count", "items").unwrap();
        assert_eq!(edge.target_components(), vec![added]);
        assert_eq!(tree.stale_count(id(1), "count"), 1);
        assert_eq!(engine.value(&mut tree, id(1), "count").unwrap(), Some(json!(1)));
    }

    #[test]
    fn expansion_attaches_replacements_and_updates_children() {
        let mut tree = item_tree();
        tree.insert(id(1), None, ComponentSpec::new("list").variable(count_children()));
        tree.insert(
            id(2),
            Some(id(1)),
            ComponentSpec::new("repeat")
                .replaced_by(vec![ComponentSpec::new("item"), ComponentSpec::new("item")]),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let expand = Item::expand_composite(id(2));
        assert_eq!(
            engine.blockers_of(&Item::recalculate(id(1), "count", "items")),
            vec![expand.clone()]
        );

        assert_eq!(engine.value(&mut tree, id(1), "count").unwrap(), Some(json!(2)));
        let replacements = tree.replacements(id(2)).unwrap();
        assert_eq!(replacements.len(), 2);
        assert!(replacements.iter().all(|r| engine.store().contains_component(*r)));
        assert!(engine.blocked_by(&expand).is_empty());
        assert!(engine.is_consistent());
    }

    #[test]
    fn expansion_waits_for_prerequisites() {
        let mut tree = item_tree();
        tree.insert(
            id(1),
            None,
            ComponentSpec::new("repeat")
                .variable(VarDef::computed(
                    "n",
                    Specification::of([(
                        "source",
                        DependencyDefinition::state_variable("value").of(id(5)),
                    )]),
                    |dependencies| dependencies.single("source").cloned().unwrap_or(Value::Null),
                ))
                .expands_after(["n"])
                .replaced_by(vec![ComponentSpec::new("item")]),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();

        let expand = Item::expand_composite(id(1));
        assert_eq!(engine.blockers_of(&expand), vec![Item::state_variable(id(1), "n")]);
        assert_eq!(engine.resolve_item(&mut tree, &expand, true).unwrap(), Outcome::NotYet);
        assert!(tree.replacements(id(1)).is_none());

        let source = ComponentSpec::new("number").variable(VarDef::essential("value", 1));
        tree.insert(id(5), None, source);
        engine.attach_component(&mut tree, id(5)).unwrap();
        engine.component_created(&mut tree, id(5)).unwrap();
        assert_eq!(engine.resolve_item(&mut tree, &expand, false).unwrap(), Outcome::Resolved);
        assert_eq!(tree.replacements(id(1)).map(|r| r.len()), Some(1));
    }

    #[test]
    fn ancestors_changed_reaches_the_subtree() {
        let mut tree = MemoryTree::new();
        let section =
            |title: &str| ComponentSpec::new("section").variable(VarDef::essential("title", title));
        tree.insert(id(1), None, section("a"));
        tree.insert(id(2), None, section("b"));
        tree.insert(id(3), Some(id(1)), ComponentSpec::new("div"));
        tree.insert(
            id(4),
            Some(id(3)),
            ComponentSpec::new("text").variable(VarDef::computed(
                "heading",
                Specification::of([(
                    "section",
                    DependencyDefinition::ancestor_of_type("section", ["title"]),
                )]),
                |dependencies| {
                    dependencies
                        .get("section")
                        .and_then(|section| section.component())
                        .and_then(|section| section.get("title"))
                        .cloned()
                        .unwrap_or(Value::Null)
                },
            )),
        );
        let mut engine = Engine::default();
        tree.attach_all(&mut engine).unwrap();
        assert_eq!(engine.value(&mut tree, id(4), "heading").unwrap(), Some(json!("a")));

        tree.reparent(id(3), Some(id(2)));
        engine.ancestors_changed(&mut tree, id(3), UpdateMode::Block).unwrap();
        assert_eq!(engine.value(&mut tree, id(4), "heading").unwrap(), Some(json!("b")));
    }
}
