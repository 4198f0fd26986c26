//! The transaction handle.
//!
//! A [`Tx`] is a view: a shared handle core plus the context the view was
//! obtained through. The core owns the physical transaction and the nesting
//! counter; views are cheap to clone and may carry different contexts, which
//! is how a handle found through a nested context logs against that nested
//! context without anything being mutated.
//!
//! ```text
//!   Tx { ctx: A } ──┐
//!   Tx { ctx: B } ──┼──► TxCore { raw: Option<Box<dyn RawTx>>, depth }
//!   Context(A/B) ───┘          (Arc, shared)
//! ```
//!
//! A handle belongs to one logical call chain. The nesting counter is not a
//! synchronization point: driving nested begin/commit of one handle from two
//! threads interleaves save-point names and is not supported.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

use super::error::{TransactionError, TransactionResult};
use super::savepoint;
use super::stmt::Stmt;
use crate::context::{Context, ContextKey};
use crate::db::Database;
use crate::driver::{DriverResult, ExecResult, RawTx, ResultSet};
use crate::trace::{StatementKind, Timer};

/// Context key carrying the process-wide sequence number of the transaction
/// a context belongs to, for log correlation.
pub const TRANSACTION_ID_KEY: ContextKey = ContextKey::from_static("TransactionId");

static TRANSACTION_SEQ: AtomicU64 = AtomicU64::new(0);

struct TxState {
    /// `None` once the physical transaction is finalized.
    raw: Option<Box<dyn RawTx>>,
    /// Open nested levels; 0 means only the physical transaction is open.
    depth: usize,
}

pub(crate) struct TxCore {
    id: String,
    seq: u64,
    db: Database,
    state: Mutex<TxState>,
}

impl Drop for TxCore {
    fn drop(&mut self) {
        let Some(raw) = self.state.get_mut().raw.take() else {
            return;
        };
        warn!(
            tx_id = %self.id,
            group = %self.db.group(),
            "transaction dropped while open, rolling back"
        );
        let timer = Timer::start();
        let result = raw.rollback();
        let record = timer.finish(
            StatementKind::Rollback,
            "ROLLBACK",
            &[],
            result.err().map(|e| e.to_string()),
            self.db.group(),
            Some(&self.id),
        );
        self.db.record(&Context::background(), record);
    }
}

/// A transaction handle.
#[derive(Clone)]
pub struct Tx {
    pub(crate) core: Arc<TxCore>,
    ctx: Context,
}

impl Tx {
    /// Start a physical transaction on `db`'s driver.
    pub(crate) fn begin(db: &Database, ctx: &Context) -> TransactionResult<Tx> {
        let timer = Timer::start();
        let raw = match db.driver().begin(ctx) {
            Ok(raw) => raw,
            Err(e) => {
                let record = timer.finish(
                    StatementKind::Begin,
                    "BEGIN",
                    &[],
                    Some(e.to_string()),
                    db.group(),
                    None,
                );
                db.record(ctx, record);
                return Err(e.into());
            }
        };

        let seq = TRANSACTION_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let id = Ulid::new().to_string().to_lowercase();
        let ctx = ctx.with_value(TRANSACTION_ID_KEY, seq);
        let record = timer.finish(StatementKind::Begin, "BEGIN", &[], None, db.group(), Some(&id));
        db.record(&ctx, record);
        debug!(tx_id = %id, seq, group = %db.group(), driver = db.driver().name(), "transaction started");

        Ok(Tx {
            core: Arc::new(TxCore {
                id,
                seq,
                db: db.clone(),
                state: Mutex::new(TxState {
                    raw: Some(raw),
                    depth: 0,
                }),
            }),
            ctx,
        })
    }

    pub(crate) fn from_core(core: Arc<TxCore>, ctx: Context) -> Tx {
        Tx { core, ctx }
    }

    /// Unique id of this transaction.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Process-wide sequence number, also stored under [`TRANSACTION_ID_KEY`].
    pub fn seq(&self) -> u64 {
        self.core.seq
    }

    pub fn group(&self) -> &str {
        self.core.db.group()
    }

    pub fn db(&self) -> &Database {
        &self.core.db
    }

    /// Context this view runs statements under.
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// The same handle viewed through another context.
    pub fn with_ctx(&self, ctx: Context) -> Tx {
        Tx {
            core: self.core.clone(),
            ctx,
        }
    }

    /// True if both views share one handle.
    pub fn same_handle(&self, other: &Tx) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Number of open nested levels.
    pub fn depth(&self) -> usize {
        self.core.state.lock().depth
    }

    pub fn is_finalized(&self) -> bool {
        self.core.state.lock().raw.is_none()
    }

    fn finalized(&self) -> TransactionError {
        TransactionError::Finalized {
            tx_id: self.core.id.clone(),
        }
    }

    /// Run one driver call against the physical transaction and trace it.
    fn run<R>(
        &self,
        kind: StatementKind,
        sql: &str,
        args: &[Value],
        op: impl FnOnce(&mut Box<dyn RawTx>, &Context) -> DriverResult<R>,
    ) -> TransactionResult<R> {
        let timer = Timer::start();
        let result = {
            let mut state = self.core.state.lock();
            match state.raw.as_mut() {
                Some(raw) => op(raw, &self.ctx),
                None => return Err(self.finalized()),
            }
        };
        let record = timer.finish(
            kind,
            sql,
            args,
            result.as_ref().err().map(|e| e.to_string()),
            self.group(),
            Some(self.id()),
        );
        self.core.db.record(&self.ctx, record);
        result.map_err(TransactionError::from)
    }

    /// Run a query inside this transaction.
    pub fn query(&self, sql: &str, args: &[Value]) -> TransactionResult<ResultSet> {
        self.run(StatementKind::Query, sql, args, |raw, ctx| raw.query(ctx, sql, args))
    }

    /// Run a statement that returns no rows inside this transaction.
    pub fn exec(&self, sql: &str, args: &[Value]) -> TransactionResult<ExecResult> {
        self.run(StatementKind::Exec, sql, args, |raw, ctx| raw.exec(ctx, sql, args))
    }

    /// Prepare `sql` for repeated execution inside this transaction.
    pub fn prepare(&self, sql: &str) -> TransactionResult<Stmt> {
        let prepared = self.run(StatementKind::Prepare, sql, &[], |raw, ctx| raw.prepare(ctx, sql))?;
        Ok(Stmt::new(self.clone(), prepared))
    }

    /// Open a nested level by creating the save point for the next depth.
    ///
    /// The counter only moves when the save point was created.
    pub fn begin_nested(&self) -> TransactionResult<()> {
        let name = savepoint::nested_name(self.core.db.dialect(), self.depth() + 1);
        self.exec(&savepoint::create(&name), &[])?;
        self.core.state.lock().depth += 1;
        Ok(())
    }

    /// Decrement the counter, returning the depth it had, if nested.
    fn pop_level(&self) -> Option<usize> {
        let mut state = self.core.state.lock();
        if state.depth == 0 {
            return None;
        }
        let depth = state.depth;
        state.depth -= 1;
        Some(depth)
    }

    /// Commit the innermost open level.
    ///
    /// Inside a nested level this releases that level's save point. At depth
    /// zero it commits the physical transaction, after which the handle is
    /// finalized.
    pub fn commit(&self) -> TransactionResult<()> {
        match self.pop_level() {
            Some(depth) => {
                let name = savepoint::nested_name(self.core.db.dialect(), depth);
                self.exec(&savepoint::release(&name), &[]).map(|_| ())
            }
            None => self.finalize(StatementKind::Commit),
        }
    }

    /// Roll back the innermost open level.
    ///
    /// Inside a nested level this rolls back to that level's save point. At
    /// depth zero it rolls back the physical transaction, after which the
    /// handle is finalized.
    pub fn rollback(&self) -> TransactionResult<()> {
        match self.pop_level() {
            Some(depth) => {
                let name = savepoint::nested_name(self.core.db.dialect(), depth);
                self.exec(&savepoint::rollback_to(&name), &[]).map(|_| ())
            }
            None => self.finalize(StatementKind::Rollback),
        }
    }

    fn finalize(&self, kind: StatementKind) -> TransactionResult<()> {
        let raw = self.core.state.lock().raw.take().ok_or_else(|| self.finalized())?;

        let timer = Timer::start();
        let (sql, result) = match kind {
            StatementKind::Commit => ("COMMIT", raw.commit()),
            _ => ("ROLLBACK", raw.rollback()),
        };
        let record = timer.finish(
            kind,
            sql,
            &[],
            result.as_ref().err().map(|e| e.to_string()),
            self.group(),
            Some(self.id()),
        );
        self.core.db.record(&self.ctx, record);
        debug!(tx_id = %self.id(), group = %self.group(), outcome = sql, ok = result.is_ok(), "transaction finalized");

        result.map_err(TransactionError::from)
    }

    /// Create a save point with a caller-chosen name.
    ///
    /// Independent of the nesting counter.
    pub fn save_point(&self, point: &str) -> TransactionResult<()> {
        let name = self.core.db.dialect().quote_identifier(point);
        self.exec(&savepoint::create(&name), &[]).map(|_| ())
    }

    /// Roll back to a save point created with [`save_point`](Self::save_point).
    pub fn rollback_to(&self, point: &str) -> TransactionResult<()> {
        let name = self.core.db.dialect().quote_identifier(point);
        self.exec(&savepoint::rollback_to(&name), &[]).map(|_| ())
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Tx")
            .field("id", &self.core.id)
            .field("group", &self.group())
            .field("depth", &state.depth)
            .field("finalized", &state.raw.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, Dialect};
    use crate::driver::{MemoryDriver, MemoryFailure};
    use crate::trace::MemorySink;

    fn setup() -> (MemoryDriver, Arc<MemorySink>, Database) {
        let driver = MemoryDriver::new();
        let sink = Arc::new(MemorySink::new());
        let db = Database::new(driver.clone(), DatabaseConfig::default()).with_trace_sink(sink.clone());
        (driver, sink, db)
    }

    #[test]
    fn test_begin_attaches_sequence_number() {
        let (_driver, _sink, db) = setup();
        let a = db.begin().unwrap();
        let b = db.begin().unwrap();

        assert!(b.seq() > a.seq());
        assert_ne!(a.id(), b.id());
        assert_eq!(*a.ctx().value::<u64>(&TRANSACTION_ID_KEY).unwrap(), a.seq());
        a.rollback().unwrap();
        b.rollback().unwrap();
    }

    #[test]
    fn test_nested_levels_use_depth_names() {
        let (driver, _sink, db) = setup();
        let tx = db.begin().unwrap();

        tx.begin_nested().unwrap();
        tx.begin_nested().unwrap();
        assert_eq!(tx.depth(), 2);
        tx.rollback().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.depth(), 0);
        tx.commit().unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "BEGIN",
                "SAVEPOINT transaction1",
                "SAVEPOINT transaction2",
                "ROLLBACK TO SAVEPOINT transaction2",
                "RELEASE SAVEPOINT transaction1",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_failed_savepoint_leaves_counter() {
        let (driver, _sink, db) = setup();
        driver.fail_on(MemoryFailure::Statement("SAVEPOINT".into()));
        let tx = db.begin().unwrap();

        let err = tx.begin_nested().unwrap_err();
        assert!(matches!(err, TransactionError::Driver(_)));
        assert_eq!(tx.depth(), 0);
        tx.rollback().unwrap();
    }

    #[test]
    fn test_finalized_handle_rejects_operations() {
        let (driver, _sink, db) = setup();
        let tx = db.begin().unwrap();
        tx.commit().unwrap();

        assert!(tx.is_finalized());
        assert!(tx.exec("UPDATE t SET x=1", &[]).unwrap_err().is_finalized());
        assert!(tx.commit().unwrap_err().is_finalized());
        assert!(tx.rollback().unwrap_err().is_finalized());
        assert!(tx.begin_nested().unwrap_err().is_finalized());
        assert_eq!(driver.count("COMMIT"), 1);
        assert_eq!(driver.count("ROLLBACK"), 0);
    }

    #[test]
    fn test_explicit_save_points_bypass_counter() {
        let driver = MemoryDriver::new();
        let db = Database::new(driver.clone(), DatabaseConfig::default().dialect(Dialect::MySql));
        let tx = db.begin().unwrap();

        tx.save_point("before_import").unwrap();
        assert_eq!(tx.depth(), 0);
        tx.rollback_to("before_import").unwrap();
        tx.commit().unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "BEGIN",
                "SAVEPOINT `before_import`",
                "ROLLBACK TO SAVEPOINT `before_import`",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_statements_are_traced_on_failure() {
        let (driver, sink, db) = setup();
        driver.fail_on(MemoryFailure::Statement("DELETE".into()));
        let tx = db.begin().unwrap();

        tx.exec("UPDATE t SET x=?", &[Value::from(1)]).unwrap();
        assert!(tx.exec("DELETE FROM t", &[]).is_err());
        tx.rollback().unwrap();

        let records = sink.records();
        assert_eq!(sink.statements(), vec!["BEGIN", "UPDATE t SET x=?", "DELETE FROM t", "ROLLBACK"]);
        assert!(records.iter().all(|r| r.is_transaction && r.group == "default"));
        assert!(records.iter().all(|r| r.tx_id.as_deref() == Some(tx.id())));
        assert_eq!(records[1].formatted, "UPDATE t SET x=1");
        assert_eq!(records[1].kind, StatementKind::Exec);
        assert!(records[2].is_error());
        assert_eq!(records[3].kind, StatementKind::Rollback);
    }

    #[test]
    fn test_failed_commit_still_finalizes() {
        let (driver, _sink, db) = setup();
        driver.fail_on(MemoryFailure::Commit);
        let tx = db.begin().unwrap();

        assert!(matches!(tx.commit(), Err(TransactionError::Driver(_))));
        assert!(tx.is_finalized());
        assert_eq!(driver.open_transactions(), 0);
    }

    #[test]
    fn test_drop_open_handle_rolls_back() {
        let (driver, sink, db) = setup();
        {
            let tx = db.begin().unwrap();
            tx.exec("UPDATE t SET x=1", &[]).unwrap();
        }
        assert_eq!(driver.statements(), vec!["BEGIN", "UPDATE t SET x=1", "ROLLBACK"]);
        assert_eq!(sink.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(driver.open_transactions(), 0);
    }

    #[test]
    fn test_prepare_routes_through_handle() {
        let (driver, _sink, db) = setup();
        let tx = db.begin().unwrap();

        let stmt = tx.prepare("UPDATE t SET x=? WHERE id=?").unwrap();
        assert_eq!(stmt.param_count(), 2);
        stmt.exec(&[Value::from(1), Value::from(2)]).unwrap();
        assert!(stmt.exec(&[Value::from(1)]).is_err());
        tx.commit().unwrap();

        assert_eq!(driver.count("UPDATE t SET x=? WHERE id=?"), 2);
    }
}
