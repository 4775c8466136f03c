//! Shared fixtures: one temporary SQLite file behind both pool keys.
//!
//! The primary pool opens the file writable, the replica pool opens it with
//! `query_only`, so anything routed to the replica can read but never write.

#![allow(dead_code)]

use replica_router::config::DataSourceConfig;
use replica_router::db::{PoolKey, PoolRegistry};
use replica_router::users::UserService;
use std::sync::Arc;
use tempfile::TempDir;

pub struct SharedStore {
    pub registry: Arc<PoolRegistry>,
    _dir: TempDir,
}

/// A shared store with default pool options.
pub async fn shared_store() -> SharedStore {
    shared_store_with("", "").await
}

/// A shared store with extra URL query options per pool, e.g. `max_connections=1`.
pub async fn shared_store_with(primary_options: &str, replica_options: &str) -> SharedStore {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("store.db");
    let url = |options: &str| {
        if options.is_empty() {
            format!("sqlite:{}", path.display())
        } else {
            format!("sqlite:{}?{}", path.display(), options)
        }
    };

    let primary = DataSourceConfig::parse(PoolKey::Primary, &url(primary_options))
        .expect("Failed to parse primary URL");
    let replica = DataSourceConfig::parse(PoolKey::Replica, &url(replica_options))
        .expect("Failed to parse replica URL");
    let registry = PoolRegistry::connect(primary, replica)
        .await
        .expect("Failed to connect shared store");

    SharedStore {
        registry: Arc::new(registry),
        _dir: dir,
    }
}

/// Create the `users` table through a write unit of work.
pub async fn with_users_table(store: &SharedStore) {
    let mut ctx = store.registry.context();
    UserService::new()
        .ensure_schema(&mut ctx)
        .await
        .expect("Failed to create users table");
}
