//! Data models for the replica router.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

pub use connection::{ConnectionInfo, DatabaseType};
pub use query::{ExecuteResult, QueryParam, Record};
