//! Context-propagated transactions with save-point nesting.
//!
//! A transaction handle ([`Tx`]) wraps one physical driver transaction. It
//! travels with the call chain inside a [`Context`](crate::context::Context),
//! keyed by database group, so a unit of work started anywhere below an open
//! transaction joins it instead of opening a second one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            Database::transaction / Tx::transaction           │
//! │   (find or begin, bind into context, run, commit/rollback)   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        ▼                      ▼                      ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   Binding   │       │     Tx      │       │ Save points │
//!  │ (ctx ⇄ tx)  │       │ (raw + depth│       │ transaction1│
//!  │             │       │  + tracing) │       │ transaction2│
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sqltx::transaction::TransactionResult;
//!
//! db.transaction(|ctx, tx| -> TransactionResult<()> {
//!     tx.exec("INSERT INTO orders (id) VALUES (?)", &[json!(1)])?;
//!
//!     // Joins the outer transaction inside save point `transaction1`.
//!     let _ = db.transaction_ctx(ctx, |_ctx, tx| -> TransactionResult<()> {
//!         tx.exec("INSERT INTO audit (order_id) VALUES (?)", &[json!(1)])?;
//!         Ok(())
//!     });
//!     Ok(())
//! })?;
//! ```

mod binding;
mod error;
mod handle;
mod savepoint;
mod scan;
mod stmt;
mod unit_of_work;

pub use binding::{tx_from_ctx, with_tx};
pub use error::{TransactionError, TransactionResult};
pub use handle::{Tx, TRANSACTION_ID_KEY};
pub use savepoint::SAVEPOINT_PREFIX;
pub use scan::{Scan, ScanShape};
pub use stmt::Stmt;

pub(crate) use unit_of_work::run_in_database;
