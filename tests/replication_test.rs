//! Integration tests against a real primary/replica pair.
//!
//! Set TEST_PRIMARY_URL and TEST_REPLICA_URL (MySQL or PostgreSQL, with the
//! replica replicating from the primary) to run these tests.

use replica_router::config::DataSourceConfig;
use replica_router::db::{PoolKey, PoolRegistry};
use replica_router::routing::{Outcome, TransactionDefinition};
use replica_router::users::UserService;
use replica_router::RouterError;
use std::sync::Arc;
use std::time::Duration;

async fn connect_pair() -> Option<Arc<PoolRegistry>> {
    let (primary, replica) = match (
        std::env::var("TEST_PRIMARY_URL"),
        std::env::var("TEST_REPLICA_URL"),
    ) {
        (Ok(primary), Ok(replica)) => (primary, replica),
        _ => {
            eprintln!("Skipping test: TEST_PRIMARY_URL / TEST_REPLICA_URL not set");
            return None;
        }
    };

    let registry = PoolRegistry::connect(
        DataSourceConfig::parse(PoolKey::Primary, &primary).unwrap(),
        DataSourceConfig::parse(PoolKey::Replica, &replica).unwrap(),
    )
    .await
    .unwrap();
    Some(Arc::new(registry))
}

#[tokio::test]
async fn test_write_to_primary_then_read_from_replica() {
    let Some(registry) = connect_pair().await else {
        return;
    };
    let users = UserService::new();
    let mut ctx = registry.context();
    users.ensure_schema(&mut ctx).await.unwrap();

    let name = format!("replica-{}", std::process::id());
    let created = users
        .create_user(&mut ctx, &name, "replica@test.com")
        .await
        .unwrap();

    // Replication lag is outside the router; poll for a bounded time.
    let mut found = Vec::new();
    for _ in 0..50 {
        found = users.find_all_users_read_only(&mut ctx, &name).await.unwrap();
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(found, vec![created]);

    registry.close().await;
}

#[tokio::test]
async fn test_replica_session_rejects_writes() {
    let Some(registry) = connect_pair().await else {
        return;
    };
    let users = UserService::new();
    let mut ctx = registry.context();
    users.ensure_schema(&mut ctx).await.unwrap();

    let handle = ctx
        .begin(&TransactionDefinition::participate().read_only())
        .await
        .unwrap();
    assert_eq!(ctx.acquire_connection().unwrap().pool(), PoolKey::Replica);
    let result = ctx
        .execute(
            "INSERT INTO users (name, email) VALUES ('x', 'x@test.com')",
            &[],
        )
        .await;
    assert!(matches!(result, Err(RouterError::Database { .. })));
    ctx.end(handle, Outcome::Rollback).await.unwrap();

    registry.close().await;
}
