//! Trellis Core
//!
//! This crate provides the dependency engine of the Trellis reactive
//! document model. A document is a tree of components whose state
//! variables are declared in terms of other components' state variables,
//! their children, ancestors, or the replacements of dynamically expanded
//! composites. The engine keeps the resulting dependency graph consistent
//! while the tree changes and resolves it lazily.
//!
//! It implements:
//!
//! - A bidirectional dependency graph keyed by typed identifiers
//! - Blocker-gated, on-demand resolution with a bounded forced retry
//! - Cycle detection on the value graph and on the resolution order
//! - A closed set of dependency kinds sharing one lifecycle
//! - Two-phase state variables whose dependencies depend on values
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: identifiers, per-variable records, the edge store, the
//!   blocker index and the update-trigger index
//! - `dependency`: declarative definitions, kind-specific discovery, the
//!   edge lifecycle and value projection
//! - `engine`: the resolution driver, structural updates, value access and
//!   cycle detection
//! - `host`: the [`ComponentTree`](host::ComponentTree) collaborator the
//!   engine is driven by, and an in-memory implementation
//! - `config`: per-document engine settings
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::{
//!     ComponentId, ComponentSpec, DependencyDefinition, Engine, MemoryTree, Specification, VarDef,
//! };
//!
//! let (source, double) = (ComponentId::new(1), ComponentId::new(2));
//! let mut tree = MemoryTree::new();
//! tree.insert(
//!     source,
//!     None,
//!     ComponentSpec::new("number").variable(VarDef::essential("value", 4)),
//! );
//! tree.insert(
//!     double,
//!     None,
//!     ComponentSpec::new("number").variable(VarDef::computed(
//!         "double",
//!         Specification::of([("n", DependencyDefinition::state_variable("value").of(source))]),
//!         |dependencies| {
//!             let n = dependencies.single("n").and_then(|n| n.as_i64()).unwrap_or(0);
//!             json!(n * 2)
//!         },
//!     )),
//! );
//!
//! let mut engine = Engine::default();
//! tree.attach_all(&mut engine).unwrap();
//! assert_eq!(engine.value(&mut tree, double, "double").unwrap(), Some(json!(8)));
//! ```

pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod graph;
pub mod host;

pub use config::EngineConfig;
pub use dependency::{DependencyDefinition, DependencyValue, DependencyValues};
pub use engine::{Engine, Outcome, UpdateMode};
pub use error::{Error, Result};
pub use graph::{ComponentId, Item, ItemKind, Resolution, StateVarKey, VarName};
pub use host::{ComponentSpec, ComponentTree, MemoryTree, Specification, VarDef};
