//! Routing decision.

use crate::db::PoolKey;
use crate::routing::descriptor::UnitOfWorkDescriptor;

/// Pick the pool for the current descriptor.
///
/// Only an active, effectively read-only unit of work goes to the replica.
/// Everything else, including no unit of work at all, goes to the primary.
pub fn route(current: Option<&UnitOfWorkDescriptor>) -> PoolKey {
    match current {
        Some(d) if d.is_active() && d.effective_read_only() => PoolKey::Replica,
        _ => PoolKey::Primary,
    }
}
