//! Engine Errors
//!
//! Only a handful of conditions are errors. Everything that merely cannot
//! proceed *yet* (a referenced component that does not exist, a composite
//! that has not expanded, a child group that cannot be matched) is modeled
//! as a registered blocker and reported as [`Outcome::NotYet`], never as
//! an `Err`.
//!
//! The fatal variants describe authoring bugs. Once the engine returns one
//! of them it is poisoned and keeps returning the same error, so the owning
//! document can be shut down cleanly.
//!
//! [`Outcome::NotYet`]: crate::engine::Outcome::NotYet

use thiserror::Error;

use crate::graph::{ComponentId, EdgeName, VarName};

/// Engine result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dependency engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A dependency definition is malformed: a required field is missing,
    /// a field has the wrong shape, the kind is unknown, or a requested
    /// variable does not exist on a target.
    #[error("invalid dependency `{dependency}` of `{state_variable}` on {component}: {reason}")]
    InvalidDependency {
        component: ComponentId,
        state_variable: VarName,
        dependency: EdgeName,
        reason: String,
    },

    /// A determine-dependencies phase returned a specification that asked
    /// for another determine-dependencies phase.
    #[error("`{state_variable}` of {component} cannot nest determine-dependencies phases")]
    NestedDetermination {
        component: ComponentId,
        state_variable: VarName,
    },

    /// The value graph contains a cycle.
    #[error("{message}")]
    CircularDependency { message: String },

    /// The resolution-order (blocker) graph contains a cycle.
    #[error("{message}")]
    CircularResolution { message: String },

    /// The component tree collaborator reported a failure.
    #[error("component tree error: {0}")]
    Host(String),

    /// The caller referenced a component the engine never attached.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    /// The caller referenced a state variable the component does not define.
    #[error("component {component} has no state variable `{state_variable}`")]
    UnknownStateVariable {
        component: ComponentId,
        state_variable: VarName,
    },
}

impl Error {
    /// Whether this error poisons the document.
    ///
    /// Lookups of unknown components or variables are caller mistakes and
    /// leave the engine usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnknownComponent(_) | Error::UnknownStateVariable { .. }
        )
    }

    pub(crate) fn invalid(
        component: ComponentId,
        state_variable: &VarName,
        dependency: &EdgeName,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidDependency {
            component,
            state_variable: state_variable.clone(),
            dependency: dependency.clone(),
            reason: reason.into(),
        }
    }
}
