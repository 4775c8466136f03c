//! Unit-of-work definitions and descriptors.
//!
//! A [`TransactionDefinition`] is what a caller asks for; a
//! [`UnitOfWorkDescriptor`] is what the boundary manager pushed after applying
//! the propagation rules, including the effective read-only state that drives
//! routing.

use serde::Serialize;
use std::panic::Location;
use std::time::Duration;

/// How a new unit of work relates to one that is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Join the active unit of work if there is one, sharing its connection and outcome.
    Participate,
    /// Always start a new, isolated unit of work with its own connection.
    Independent,
}

impl std::fmt::Display for Propagation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Participate => write!(f, "participate"),
            Self::Independent => write!(f, "independent"),
        }
    }
}

/// Requested completion of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Commit,
    Rollback,
}

/// What a caller requests when opening a unit of work.
///
/// There is no default propagation: build one with [`participate`] or
/// [`independent`].
///
/// [`participate`]: TransactionDefinition::participate
/// [`independent`]: TransactionDefinition::independent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    name: String,
    read_only: bool,
    propagation: Propagation,
    timeout: Option<Duration>,
}

impl TransactionDefinition {
    /// A writable definition with the given propagation, named after the call site.
    #[track_caller]
    pub fn new(propagation: Propagation) -> Self {
        let caller = Location::caller();
        Self {
            name: format!("{}:{}", caller.file(), caller.line()),
            read_only: false,
            propagation,
            timeout: None,
        }
    }

    /// Join an active unit of work, or start one if none is active.
    #[track_caller]
    pub fn participate() -> Self {
        Self::new(Propagation::Participate)
    }

    /// Start an isolated unit of work regardless of nesting.
    #[track_caller]
    pub fn independent() -> Self {
        Self::new(Propagation::Independent)
    }

    /// Request read-only semantics.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the read-only request explicitly.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Name used in diagnostics instead of the call site.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the scoped form of this unit of work.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// An entry on the unit-of-work stack.
///
/// `effective_read_only` is fixed when the descriptor is created and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOfWorkDescriptor {
    id: u64,
    name: String,
    requested_read_only: bool,
    propagation: Propagation,
    effective_read_only: bool,
    active: bool,
    owns_binding: bool,
}

impl UnitOfWorkDescriptor {
    /// A unit of work that binds its own connection: the first one on an empty
    /// stack, or any independent one. Only its own request counts.
    pub(crate) fn owner(id: u64, definition: &TransactionDefinition) -> Self {
        Self {
            id,
            name: definition.name.clone(),
            requested_read_only: definition.read_only,
            propagation: definition.propagation,
            effective_read_only: definition.read_only,
            active: true,
            owns_binding: true,
        }
    }

    /// A unit of work joining `parent`. The parent's effective read-only state
    /// is inherited unchanged, whatever the child requested.
    pub(crate) fn participant(
        id: u64,
        definition: &TransactionDefinition,
        parent: &UnitOfWorkDescriptor,
    ) -> Self {
        Self {
            id,
            name: definition.name.clone(),
            requested_read_only: definition.read_only,
            propagation: Propagation::Participate,
            effective_read_only: parent.effective_read_only,
            active: parent.active,
            owns_binding: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requested_read_only(&self) -> bool {
        self.requested_read_only
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn effective_read_only(&self) -> bool {
        self.effective_read_only
    }

    /// Whether a physical connection backs this unit of work.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether this unit of work owns (and finalizes) its physical connection.
    pub fn owns_binding(&self) -> bool {
        self.owns_binding
    }
}

/// Returned by `begin`; passed back to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOfWorkHandle {
    pub(crate) id: u64,
    pub(crate) depth: usize,
}

impl UnitOfWorkHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stack depth right after this unit of work was pushed (1 = outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}
