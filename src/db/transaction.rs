//! Physical transactions bound to a unit of work.
//!
//! A [`DbTransaction`] holds one pooled connection with an open transaction
//! until it is committed or rolled back. Dropping it without either rolls the
//! transaction back when the connection returns to its pool.

use crate::db::types::row_to_record;
use crate::error::{RouterError, RouterResult};
use crate::models::{DatabaseType, ExecuteResult, QueryParam, Record};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::debug;

/// Build a query for `$db` with every parameter bound in order.
macro_rules! bind_params {
    ($db:ty, $sql:expr, $params:expr) => {{
        let mut query = sqlx::query::<$db>($sql);
        for param in $params {
            query = match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
            };
        }
        query
    }};
}

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Run a statement that does not return rows.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<ExecuteResult> {
        let result = match self {
            DbTransaction::MySql(tx) => {
                let done = bind_params!(MySql, sql, params)
                    .execute(&mut **tx)
                    .await
                    .map_err(RouterError::from)?;
                ExecuteResult {
                    rows_affected: done.rows_affected(),
                    last_insert_id: i64::try_from(done.last_insert_id()).ok(),
                }
            }
            DbTransaction::Postgres(tx) => {
                let done = bind_params!(Postgres, sql, params)
                    .execute(&mut **tx)
                    .await
                    .map_err(RouterError::from)?;
                ExecuteResult {
                    rows_affected: done.rows_affected(),
                    last_insert_id: None,
                }
            }
            DbTransaction::SQLite(tx) => {
                let done = bind_params!(Sqlite, sql, params)
                    .execute(&mut **tx)
                    .await
                    .map_err(RouterError::from)?;
                ExecuteResult {
                    rows_affected: done.rows_affected(),
                    last_insert_id: Some(done.last_insert_rowid()),
                }
            }
        };

        debug!(
            sql = %sql,
            rows_affected = result.rows_affected,
            "Executed in transaction"
        );

        Ok(result)
    }

    /// Run a query and collect every row.
    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<Vec<Record>> {
        let rows: Vec<Record> = match self {
            DbTransaction::MySql(tx) => bind_params!(MySql, sql, params)
                .fetch_all(&mut **tx)
                .await
                .map_err(RouterError::from)?
                .iter()
                .map(row_to_record)
                .collect(),
            DbTransaction::Postgres(tx) => bind_params!(Postgres, sql, params)
                .fetch_all(&mut **tx)
                .await
                .map_err(RouterError::from)?
                .iter()
                .map(row_to_record)
                .collect(),
            DbTransaction::SQLite(tx) => bind_params!(Sqlite, sql, params)
                .fetch_all(&mut **tx)
                .await
                .map_err(RouterError::from)?
                .iter()
                .map(row_to_record)
                .collect(),
        };

        debug!(
            sql = %sql,
            row_count = rows.len(),
            "Queried in transaction"
        );

        Ok(rows)
    }

    /// Commit the transaction.
    pub async fn commit(self) -> RouterResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(RouterError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(RouterError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(RouterError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> RouterResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(RouterError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(RouterError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(RouterError::from),
        }
    }
}
