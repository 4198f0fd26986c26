//! sqltx - context-propagated SQL transactions
//!
//! This crate runs units of work inside database transactions that travel
//! with the call chain. The outermost unit begins and finalizes the physical
//! transaction; every unit nested below it, in any function that receives the
//! context, joins it through a save point.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqltx::db::{Database, DatabaseConfig};
//! use sqltx::driver::{SqliteConfig, SqlitePool};
//! use sqltx::transaction::TransactionResult;
//!
//! let pool = SqlitePool::open(SqliteConfig::new("./app.db")).unwrap();
//! let db = Database::new(pool, DatabaseConfig::default());
//!
//! let result: TransactionResult<()> = db.transaction(|ctx, tx| {
//!     tx.exec("INSERT INTO users (name) VALUES (?)", &[json!("ada")])?;
//!     // Rolled back to its save point; the insert above survives.
//!     let _ = db.transaction_ctx(ctx, |_ctx, tx| -> TransactionResult<()> {
//!         tx.exec("INSERT INTO users (name) VALUES (?)", &[json!("alan")])?;
//!         Err(tx.exec("INSERT INTO missing VALUES (1)", &[]).unwrap_err())
//!     });
//!     Ok(())
//! });
//! result.unwrap();
//! ```

pub mod context;
pub mod db;
pub mod driver;
pub mod trace;
pub mod transaction;

pub use context::Context;
pub use db::{Database, DatabaseConfig};
pub use transaction::{TransactionError, TransactionResult, Tx};
