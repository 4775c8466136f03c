//! Unit-of-work routing.
//!
//! This module decides, for every connection acquisition, whether the work
//! goes to the primary or the replica:
//! - Descriptors and definitions of units of work
//! - The per-context unit-of-work stack
//! - The routing decision function
//! - The boundary manager that applies propagation rules

pub mod context;
pub mod decision;
pub mod descriptor;
pub mod stack;

pub use context::{BoundConnection, UnitOfWorkContext};
pub use decision::route;
pub use descriptor::{
    Outcome, Propagation, TransactionDefinition, UnitOfWorkDescriptor, UnitOfWorkHandle,
};
pub use stack::UnitOfWorkStack;
