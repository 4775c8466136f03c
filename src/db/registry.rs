//! The routing pool registry.
//!
//! Maps each [`PoolKey`] to exactly one connection source. The mapping is fixed
//! when the registry is built; routing only ever reads it.

use crate::config::DataSourceConfig;
use crate::db::pool::DbPool;
use crate::db::transaction::DbTransaction;
use crate::error::{RouterError, RouterResult};
use crate::models::{ConnectionInfo, DatabaseType};
use crate::routing::UnitOfWorkContext;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Routing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKey {
    /// The single writable database.
    Primary,
    /// Read-only copy kept eventually consistent with the primary.
    Replica,
}

impl PoolKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct PoolEntry {
    pool: DbPool,
    server_version: Option<String>,
    config: Option<DataSourceConfig>,
}

impl PoolEntry {
    fn acquire_timeout_secs(&self) -> u64 {
        self.config
            .as_ref()
            .map(|c| c.pool_options.acquire_timeout_or_default())
            .unwrap_or(crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }
}

#[derive(Debug)]
pub struct PoolRegistry {
    primary: PoolEntry,
    replica: PoolEntry,
}

impl PoolRegistry {
    /// Connect both data sources and build the registry.
    pub async fn connect(
        primary: DataSourceConfig,
        replica: DataSourceConfig,
    ) -> RouterResult<Self> {
        if primary.key != PoolKey::Primary || replica.key != PoolKey::Replica {
            return Err(RouterError::invalid_input(format!(
                "Data sources are swapped: got {} as primary and {} as replica",
                primary.key, replica.key
            )));
        }
        Self::check_same_backend(primary.db_type, replica.db_type)?;

        // Primary first: it creates the store a file-backed replica opens.
        let primary_pool = DbPool::connect(&primary).await?;
        let replica_pool = match DbPool::connect(&replica).await {
            Ok(pool) => pool,
            Err(e) => {
                primary_pool.close().await;
                return Err(e);
            }
        };

        let registry = Self {
            primary: PoolEntry {
                server_version: primary_pool.server_version().await,
                pool: primary_pool,
                config: Some(primary),
            },
            replica: PoolEntry {
                server_version: replica_pool.server_version().await,
                pool: replica_pool,
                config: Some(replica),
            },
        };

        info!(
            primary_version = ?registry.primary.server_version,
            replica_version = ?registry.replica.server_version,
            "Pool registry ready"
        );

        Ok(registry)
    }

    /// Wrap pools that were built elsewhere.
    pub fn from_pools(primary: DbPool, replica: DbPool) -> RouterResult<Self> {
        Self::check_same_backend(primary.db_type(), replica.db_type())?;
        Ok(Self {
            primary: PoolEntry {
                pool: primary,
                server_version: None,
                config: None,
            },
            replica: PoolEntry {
                pool: replica,
                server_version: None,
                config: None,
            },
        })
    }

    fn check_same_backend(primary: DatabaseType, replica: DatabaseType) -> RouterResult<()> {
        if primary != replica {
            return Err(RouterError::invalid_input(format!(
                "Primary is {} but replica is {}; both must use the same backend",
                primary, replica
            )));
        }
        Ok(())
    }

    fn entry(&self, key: PoolKey) -> &PoolEntry {
        match key {
            PoolKey::Primary => &self.primary,
            PoolKey::Replica => &self.replica,
        }
    }

    /// Get the pool behind a routing key.
    pub fn pool(&self, key: PoolKey) -> &DbPool {
        &self.entry(key).pool
    }

    /// Database type shared by both pools.
    pub fn db_type(&self) -> DatabaseType {
        self.primary.pool.db_type()
    }

    /// Acquire a connection from the keyed pool and open a transaction on it.
    ///
    /// Waits at most the pool's acquire timeout. Failures are reported against
    /// the requested pool; the other pool is never tried instead.
    pub async fn begin(&self, key: PoolKey) -> RouterResult<DbTransaction> {
        let entry = self.entry(key);
        debug!(pool = %key, "Acquiring connection");
        entry.pool.begin().await.map_err(|e| match (key, e) {
            (_, sqlx::Error::PoolTimedOut) => {
                RouterError::pool_exhausted(key, entry.acquire_timeout_secs())
            }
            (PoolKey::Replica, e) => RouterError::replica_unavailable(e.to_string()),
            (PoolKey::Primary, e) => RouterError::from(e),
        })
    }

    /// Start a fresh unit-of-work context for one logical execution path.
    pub fn context(self: &Arc<Self>) -> UnitOfWorkContext {
        UnitOfWorkContext::new(Arc::clone(self))
    }

    /// Describe both data sources.
    pub fn info(&self) -> Vec<ConnectionInfo> {
        [PoolKey::Primary, PoolKey::Replica]
            .into_iter()
            .map(|key| {
                let entry = self.entry(key);
                ConnectionInfo {
                    pool: key,
                    database_type: entry.pool.db_type(),
                    server_version: entry.server_version.clone(),
                    database: entry.config.as_ref().and_then(|c| c.database.clone()),
                    endpoint: entry
                        .config
                        .as_ref()
                        .map(|c| c.masked_connection_string())
                        .unwrap_or_default(),
                    max_connections: entry
                        .config
                        .as_ref()
                        .map(|c| {
                            c.pool_options
                                .max_connections_or_default(c.db_type == DatabaseType::SQLite)
                        })
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Close both pools.
    pub async fn close(&self) {
        for key in [PoolKey::Primary, PoolKey::Replica] {
            info!(pool = %key, "Closing pool");
            self.entry(key).pool.close().await;
        }
        info!("All pools closed");
    }
}
