//! User accounts: a small service layer that exercises routing.
//!
//! `UserService` opens the units of work, `UserRepository` runs the SQL on
//! whatever connection the current unit of work is routed to, and
//! `UserOuterService` combines the two into the read-then-write flows.

use crate::error::{RouterError, RouterResult};
use crate::models::{DatabaseType, QueryParam, Record};
use crate::routing::{TransactionDefinition, UnitOfWorkContext};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

impl User {
    fn from_record(record: &Record) -> RouterResult<Self> {
        let id = record
            .get("id")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| RouterError::internal("users row without an integer id"))?;
        let text = |column: &str| {
            record
                .get(column)
                .and_then(JsonValue::as_str)
                .map(String::from)
                .ok_or_else(|| RouterError::internal(format!("users row without text {}", column)))
        };
        Ok(Self {
            id,
            name: text("name")?,
            email: text("email")?,
        })
    }
}

fn placeholder(db_type: DatabaseType, index: usize) -> String {
    match db_type {
        DatabaseType::PostgreSQL => format!("${}", index),
        DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
    }
}

/// SQL for the `users` table. Runs on the connection of the current unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserRepository;

impl UserRepository {
    /// Create the `users` table if it does not exist.
    pub async fn ensure_schema(&self, ctx: &mut UnitOfWorkContext) -> RouterResult<()> {
        let mut conn = ctx.acquire_connection()?;
        let ddl = match conn.db_type() {
            DatabaseType::SQLite => {
                "CREATE TABLE IF NOT EXISTS users (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 name TEXT NOT NULL, \
                 email TEXT NOT NULL)"
            }
            DatabaseType::MySQL => {
                "CREATE TABLE IF NOT EXISTS users (\
                 id BIGINT AUTO_INCREMENT PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL, \
                 email VARCHAR(255) NOT NULL)"
            }
            DatabaseType::PostgreSQL => {
                "CREATE TABLE IF NOT EXISTS users (\
                 id BIGSERIAL PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL, \
                 email VARCHAR(255) NOT NULL)"
            }
        };
        conn.execute(ddl, &[]).await?;
        Ok(())
    }

    pub async fn save(&self, ctx: &mut UnitOfWorkContext, name: &str, email: &str) -> RouterResult<User> {
        let mut conn = ctx.acquire_connection()?;
        let db_type = conn.db_type();
        let params = [QueryParam::from(name), QueryParam::from(email)];
        let insert = format!(
            "INSERT INTO users (name, email) VALUES ({}, {})",
            placeholder(db_type, 1),
            placeholder(db_type, 2)
        );

        if db_type == DatabaseType::PostgreSQL {
            let rows = conn
                .fetch_all(&format!("{} RETURNING id, name, email", insert), &params)
                .await?;
            let row = rows
                .first()
                .ok_or_else(|| RouterError::internal("INSERT ... RETURNING produced no row"))?;
            return User::from_record(row);
        }

        let result = conn.execute(&insert, &params).await?;
        let id = result
            .last_insert_id
            .ok_or_else(|| RouterError::internal("backend did not report the generated id"))?;
        Ok(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    pub async fn find_all_by_name(&self, ctx: &mut UnitOfWorkContext, name: &str) -> RouterResult<Vec<User>> {
        let mut conn = ctx.acquire_connection()?;
        let sql = format!(
            "SELECT id, name, email FROM users WHERE name = {} ORDER BY id",
            placeholder(conn.db_type(), 1)
        );
        conn.fetch_all(&sql, &[QueryParam::from(name)])
            .await?
            .iter()
            .map(User::from_record)
            .collect()
    }
}

fn log_unit_state(ctx: &UnitOfWorkContext, operation: &str) {
    let current = ctx.current();
    info!(
        context_id = %ctx.id(),
        operation = operation,
        unit = current.map(|d| d.name()).unwrap_or("-"),
        read_only = current.is_some_and(|d| d.effective_read_only()),
        active = current.is_some_and(|d| d.is_active()),
        pool = %ctx.route(),
        "Unit of work state"
    );
}

/// User operations, each in its own unit of work.
#[derive(Debug, Clone, Default)]
pub struct UserService {
    repository: UserRepository,
    timeout: Option<Duration>,
}

impl UserService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every unit of work this service opens.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn definition(&self, definition: TransactionDefinition) -> TransactionDefinition {
        match self.timeout {
            Some(timeout) => definition.with_timeout(timeout),
            None => definition,
        }
    }

    /// Create the `users` table in a write unit of work.
    pub async fn ensure_schema(&self, ctx: &mut UnitOfWorkContext) -> RouterResult<()> {
        let definition = self.definition(TransactionDefinition::participate().named("ensure_schema"));
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            self.repository.ensure_schema(ctx).await
        })
        .await
    }

    /// Insert a user, joining the active unit of work if there is one.
    pub async fn create_user(&self, ctx: &mut UnitOfWorkContext, name: &str, email: &str) -> RouterResult<User> {
        let definition = self.definition(TransactionDefinition::participate().named("create_user"));
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            log_unit_state(ctx, "create_user");
            self.repository.save(ctx, name, email).await
        })
        .await
    }

    /// Insert a user in its own unit of work, suspending any active one.
    pub async fn create_user_independent(
        &self,
        ctx: &mut UnitOfWorkContext,
        name: &str,
        email: &str,
    ) -> RouterResult<User> {
        let definition =
            self.definition(TransactionDefinition::independent().named("create_user_independent"));
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            log_unit_state(ctx, "create_user_independent");
            self.repository.save(ctx, name, email).await
        })
        .await
    }

    /// Look users up by name in a read-only unit of work.
    pub async fn find_all_users_read_only(&self, ctx: &mut UnitOfWorkContext, name: &str) -> RouterResult<Vec<User>> {
        let definition = self.definition(
            TransactionDefinition::participate()
                .read_only()
                .named("find_all_users_read_only"),
        );
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            log_unit_state(ctx, "find_all_users_read_only");
            self.repository.find_all_by_name(ctx, name).await
        })
        .await
    }
}

/// Read-then-write flows built on [`UserService`].
#[derive(Debug, Clone, Default)]
pub struct UserOuterService {
    users: UserService,
}

impl UserOuterService {
    pub fn new(users: UserService) -> Self {
        Self { users }
    }

    /// Read then write with no enclosing unit of work: the lookup runs on the
    /// replica, the insert on the primary.
    pub async fn read_then_write(&self, ctx: &mut UnitOfWorkContext, name: &str, email: &str) -> RouterResult<User> {
        info!(context_id = %ctx.id(), "Read-only lookup");
        self.users.find_all_users_read_only(ctx, name).await?;
        info!(context_id = %ctx.id(), "Write");
        self.users.create_user(ctx, name, email).await
    }

    /// Read then write inside one write unit of work. The read-only request
    /// joins the writable unit, so both run on the primary.
    pub async fn read_then_write_in_transaction(
        &self,
        ctx: &mut UnitOfWorkContext,
        name: &str,
        email: &str,
    ) -> RouterResult<User> {
        let definition = self
            .users
            .definition(TransactionDefinition::participate().named("read_then_write_in_transaction"));
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            info!(context_id = %ctx.id(), "Read-only lookup");
            self.users.find_all_users_read_only(ctx, name).await?;
            info!(context_id = %ctx.id(), "Write");
            self.users.create_user(ctx, name, email).await
        })
        .await
    }

    /// Read inside a write unit of work, then write in an independent unit.
    pub async fn read_then_write_independent(
        &self,
        ctx: &mut UnitOfWorkContext,
        name: &str,
        email: &str,
    ) -> RouterResult<User> {
        let definition = self
            .users
            .definition(TransactionDefinition::participate().named("read_then_write_independent"));
        ctx.transactional(definition, async |ctx: &mut UnitOfWorkContext| {
            info!(context_id = %ctx.id(), "Read-only lookup");
            self.users.find_all_users_read_only(ctx, name).await?;
            info!(context_id = %ctx.id(), "Write");
            self.users.create_user_independent(ctx, name, email).await
        })
        .await
    }
}
