//! Database access layer.
//!
//! This module provides the physical side of routing:
//! - Per-backend connection pools, with read-only replica sessions
//! - The fixed primary/replica pool registry
//! - Transactions bound to a unit of work
//! - Row decoding into backend-neutral records

pub mod pool;
pub mod registry;
pub mod transaction;
pub(crate) mod types;

pub use pool::DbPool;
pub use registry::{PoolKey, PoolRegistry};
pub use transaction::DbTransaction;
