//! Replica Router Library
//!
//! Routes database work between a writable primary and a read-only replica
//! based on the declared semantics of the current unit of work (read-only
//! flag, propagation, nesting), never on the SQL being run.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routing;
pub mod users;

pub use config::Config;
pub use db::{PoolKey, PoolRegistry};
pub use error::{RouterError, RouterResult};
pub use routing::{Outcome, Propagation, TransactionDefinition, UnitOfWorkContext};
