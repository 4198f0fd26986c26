//! Database groups.
//!
//! A [`Database`] binds a driver to a [`DatabaseConfig`]: the group name that
//! namespaces transactions in a context, the SQL dialect used to quote
//! save-point names, and whether statements are logged.

mod config;
mod database;
mod dialect;

pub use config::{DatabaseConfig, DEFAULT_GROUP};
pub use database::Database;
pub use dialect::Dialect;
