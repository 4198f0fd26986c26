//! Unit-of-work execution.
//!
//! A unit of work is a closure run inside a transaction. The outermost unit
//! for a context opens the physical transaction and is the only one that
//! commits or rolls it back; units nested inside it, found through the
//! context, run inside a save point of the same handle instead.
//!
//! Each unit is finalized exactly once: commit when the closure returns
//! `Ok`, rollback when it returns `Err` or panics. A panic is caught at the
//! unit boundary and turned into [`TransactionError::Panicked`], and a
//! failing commit or rollback replaces the closure's result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use super::binding::{tx_from_ctx, with_tx};
use super::error::TransactionError;
use super::handle::Tx;
use crate::context::Context;
use crate::db::Database;

/// Run `f` in a transaction of `db`, reusing the one bound to `ctx` if any.
pub(crate) fn run_in_database<F, T, E>(db: &Database, ctx: &Context, f: F) -> Result<T, E>
where
    F: FnOnce(&Context, &Tx) -> Result<T, E>,
    E: From<TransactionError>,
{
    let ctx = if ctx.is_empty() { db.ctx().clone() } else { ctx.clone() };

    if let Some(tx) = tx_from_ctx(&ctx, db.group()) {
        return tx.transaction(&ctx, f);
    }

    let tx = Tx::begin(db, &ctx)?;
    let tx = tx.with_ctx(with_tx(tx.ctx(), &tx));
    let outcome = run_guarded(&tx, f);
    finish(&tx, outcome)
}

impl Tx {
    /// Run `f` as a nested unit of work inside this handle.
    ///
    /// Opens a save point, runs `f`, then releases the save point on `Ok`
    /// or rolls back to it on `Err` or panic. The physical transaction is
    /// left to whoever owns it.
    pub fn transaction<F, T, E>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(&Context, &Tx) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let mut tx = if ctx.is_empty() {
            self.clone()
        } else {
            self.with_ctx(ctx.clone())
        };
        if tx_from_ctx(tx.ctx(), tx.group()).is_none() {
            tx = tx.with_ctx(with_tx(tx.ctx(), &tx));
        }

        tx.begin_nested()?;
        let outcome = run_guarded(&tx, f);
        finish(&tx, outcome)
    }
}

fn run_guarded<F, T, E>(tx: &Tx, f: F) -> Result<T, E>
where
    F: FnOnce(&Context, &Tx) -> Result<T, E>,
    E: From<TransactionError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f(tx.ctx(), tx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(tx_id = %tx.id(), depth = tx.depth(), panic = %message, "unit of work panicked");
            Err(TransactionError::Panicked(message).into())
        }
    }
}

fn finish<T, E>(tx: &Tx, outcome: Result<T, E>) -> Result<T, E>
where
    E: From<TransactionError>,
{
    match outcome {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => match tx.rollback() {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(rollback_err.into()),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit of work panicked".to_string()
    }
}
