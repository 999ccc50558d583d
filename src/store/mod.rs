//! Persistence for task definitions, run logs and accounts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AccountStore, RunLogStore, TaskStore};
