//! Integration tests for the user service flows.

mod common;

use common::{shared_store, with_users_table};
use replica_router::routing::{TransactionDefinition, UnitOfWorkContext};
use replica_router::users::{UserOuterService, UserService};
use replica_router::{PoolKey, RouterError};
use std::time::Duration;

#[tokio::test]
async fn test_create_then_find_read_only() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let users = UserService::new();
    let mut ctx = store.registry.context();

    let first = users
        .create_user(&mut ctx, "Master Test User", "master@test.com")
        .await
        .unwrap();
    let second = users
        .create_user(&mut ctx, "Slave Test User", "slave@test.com")
        .await
        .unwrap();
    assert_eq!(first.name, "Master Test User");
    assert_ne!(first.id, second.id);

    let found = users
        .find_all_users_read_only(&mut ctx, "Slave Test User")
        .await
        .unwrap();
    assert_eq!(found, vec![second]);
    assert_eq!(ctx.depth(), 0);
}

#[tokio::test]
async fn test_read_then_write_without_enclosing_unit() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let outer = UserOuterService::new(UserService::new());
    let mut ctx = store.registry.context();

    let user = outer
        .read_then_write(&mut ctx, "test", "test@gmail.com")
        .await
        .unwrap();
    assert_eq!(user.name, "test");
    assert_eq!(ctx.depth(), 0);
}

#[tokio::test]
async fn test_read_then_write_in_transaction() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let outer = UserOuterService::new(UserService::new());
    let mut ctx = store.registry.context();

    let user = outer
        .read_then_write_in_transaction(&mut ctx, "test", "test@gmail.com")
        .await
        .unwrap();
    assert_eq!(user.name, "test");
    assert_eq!(ctx.depth(), 0);
}

#[tokio::test]
async fn test_read_then_write_independent() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let outer = UserOuterService::new(UserService::new());
    let mut ctx = store.registry.context();

    let user = outer
        .read_then_write_independent(&mut ctx, "test", "test@gmail.com")
        .await
        .unwrap();
    assert_eq!(user.name, "test");
    assert_eq!(ctx.depth(), 0);
}

#[tokio::test]
async fn test_read_only_lookup_joins_writable_unit() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let users = UserService::new();
    let mut ctx = store.registry.context();

    let found = ctx
        .transactional(
            TransactionDefinition::participate(),
            async |ctx: &mut UnitOfWorkContext| {
                users.create_user(ctx, "nina", "nina@example.com").await?;
                // Still uncommitted: only visible on the same primary connection.
                let found = users.find_all_users_read_only(ctx, "nina").await?;
                assert_eq!(ctx.route(), PoolKey::Primary);
                Ok(found)
            },
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_read_only_lookup_under_read_only_unit_uses_replica() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let users = UserService::new();
    let mut ctx = store.registry.context();
    users
        .create_user(&mut ctx, "oscar", "oscar@example.com")
        .await
        .unwrap();

    let result = ctx
        .transactional(
            TransactionDefinition::participate().read_only(),
            async |ctx: &mut UnitOfWorkContext| {
                let found = users.find_all_users_read_only(ctx, "oscar").await?;
                assert_eq!(found.len(), 1);
                // Joining a read-only unit keeps the write on the replica.
                users.create_user(ctx, "oscar", "again@example.com").await
            },
        )
        .await;
    assert!(matches!(result, Err(RouterError::Database { .. })));
    assert_eq!(ctx.depth(), 0);

    let found = users.find_all_users_read_only(&mut ctx, "oscar").await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_independent_write_commits_before_parent_fails() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let users = UserService::new();
    let mut ctx = store.registry.context();

    let result: Result<(), _> = ctx
        .transactional(
            TransactionDefinition::participate().read_only(),
            async |ctx: &mut UnitOfWorkContext| {
                users
                    .create_user_independent(ctx, "paul", "paul@example.com")
                    .await?;
                Err(RouterError::invalid_input("abort parent"))
            },
        )
        .await;
    assert!(result.is_err());

    let found = users.find_all_users_read_only(&mut ctx, "paul").await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_service_timeout_applies() {
    let store = shared_store().await;
    with_users_table(&store).await;
    let users = UserService::new().with_timeout(Duration::from_secs(5));
    let mut ctx = store.registry.context();

    let user = users
        .create_user(&mut ctx, "quinn", "quinn@example.com")
        .await
        .unwrap();
    assert_eq!(user.email, "quinn@example.com");
}
