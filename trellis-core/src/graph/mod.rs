//! Dependency Graph
//!
//! This module holds the bookkeeping structures of the engine: typed
//! identifiers, per-variable records, the edge arena with its two indices,
//! the resolve-blocker index, and the update-trigger index.
//!
//! # Overview
//!
//! - A state variable owns a set of named dependencies (edges). Each edge
//!   points at a dynamically discovered list of target (component, variable)
//!   pairs.
//! - Every edge is indexed twice: as a downstream edge of its owner and as
//!   an upstream edge of each current target. Teardown removes both.
//! - Blockers say which items must resolve before which others and are
//!   indexed in both directions.
//! - Update triggers say which edges to re-examine when a piece of tree
//!   structure (children, replacements, ancestors, counters) changes.
//!
//! # Design Decisions
//!
//! 1. Everything is keyed by typed identifiers rather than concatenated
//!    strings, so lookups never parse.
//!
//! 2. Edges live in one arena per document and are referred to by
//!    [`DependencyId`]. Indices store ids, never references, so there are
//!    no ownership cycles.
//!
//! 3. Resolution status is an explicit tri-state ([`Resolution`]) so a
//!    stale-but-retained value is a state of its own.

mod blockers;
mod node;
mod store;
mod triggers;

pub use blockers::{BlockerIndex, Item, ItemKind};
pub use node::{
    ComponentId, ComponentRecord, EdgeName, Resolution, StateVarKey, StateVarRecord, VarName,
};
pub use store::{DependencyId, GraphStore, UpstreamSlot};
pub use triggers::{TriggerKey, UpdateTriggers};
