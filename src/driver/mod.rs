//! Driver boundary for the transaction core.
//!
//! The core never talks to a database directly. It asks a [`Driver`] for a
//! physical transaction on a writable connection and then routes every
//! statement through the returned [`RawTx`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Driver (pool)                         │
//! │     (owns connections, hands one out per transaction)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ begin()
//!                              ▼
//!                       ┌─────────────┐
//!                       │    RawTx    │  query / exec / prepare
//!                       │ (physical)  │  commit / rollback (consuming)
//!                       └─────────────┘
//! ```
//!
//! Two drivers ship with the crate: [`SqlitePool`] over rusqlite, and
//! [`MemoryDriver`], which only records what it is asked to run.

mod error;
mod memory;
mod result;
mod sqlite;

use serde_json::Value;

use crate::context::Context;

pub use error::{DriverError, DriverResult};
pub use memory::{MemoryDriver, MemoryFailure};
pub use result::{ExecResult, Record, ResultSet};
pub use sqlite::{SqliteConfig, SqlitePool};

/// A connection pool able to start physical transactions.
pub trait Driver: Send + Sync {
    /// Short driver name for logs.
    fn name(&self) -> &str;

    /// Acquire a writable connection and start a transaction on it.
    ///
    /// The connection stays reserved for the returned transaction until it
    /// is committed, rolled back or dropped.
    fn begin(&self, ctx: &Context) -> DriverResult<Box<dyn RawTx>>;
}

/// One physical, connection-level transaction.
///
/// Statement methods must fail with [`DriverError::Context`] when `ctx` is
/// already done. `commit` and `rollback` consume the transaction, so it can
/// be finalized at most once.
pub trait RawTx: Send {
    fn query(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<ResultSet>;

    fn exec(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<ExecResult>;

    /// Validate `sql` and report its placeholder count.
    fn prepare(&mut self, ctx: &Context, sql: &str) -> DriverResult<Prepared>;

    fn commit(self: Box<Self>) -> DriverResult<()>;

    fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// A statement the driver has accepted for later execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub sql: String,
    pub param_count: usize,
}
