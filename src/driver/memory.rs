//! In-memory recording driver.
//!
//! [`MemoryDriver`] executes nothing. It records the text of every statement
//! it receives, answers queries with canned result sets and fails on demand,
//! which makes exact statement sequences observable without a database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::error::{DriverError, DriverResult};
use super::result::{ExecResult, ResultSet};
use super::{Driver, Prepared, RawTx};
use crate::context::Context;

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFailure {
    /// `begin` fails before a transaction exists.
    Begin,
    /// The physical commit fails.
    Commit,
    /// The physical rollback fails.
    Rollback,
    /// Any statement starting with this text fails.
    Statement(String),
}

#[derive(Default)]
struct MemoryInner {
    log: Mutex<Vec<String>>,
    failures: Mutex<Vec<MemoryFailure>>,
    canned: Mutex<HashMap<String, ResultSet>>,
    open: Mutex<usize>,
}

impl MemoryInner {
    fn record(&self, sql: &str) {
        self.log.lock().push(sql.to_string());
    }

    fn should_fail(&self, failure: &MemoryFailure) -> bool {
        self.failures.lock().contains(failure)
    }

    fn statement_fails(&self, sql: &str) -> bool {
        self.failures.lock().iter().any(|f| match f {
            MemoryFailure::Statement(prefix) => sql.starts_with(prefix.as_str()),
            _ => false,
        })
    }
}

/// Driver that records statements instead of running them.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    inner: Arc<MemoryInner>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later matching operation fail.
    pub fn fail_on(&self, failure: MemoryFailure) {
        self.inner.failures.lock().push(failure);
    }

    pub fn clear_failures(&self) {
        self.inner.failures.lock().clear();
    }

    /// Answer queries whose text equals `sql` with `rows`.
    pub fn with_rows(&self, sql: impl Into<String>, rows: ResultSet) {
        self.inner.canned.lock().insert(sql.into(), rows);
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner.log.lock().clone()
    }

    /// Number of received statements equal to `sql`.
    pub fn count(&self, sql: &str) -> usize {
        self.inner.log.lock().iter().filter(|s| s.as_str() == sql).count()
    }

    pub fn clear_statements(&self) {
        self.inner.log.lock().clear();
    }

    /// Physical transactions begun and not yet finalized or dropped.
    pub fn open_transactions(&self) -> usize {
        *self.inner.open.lock()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn begin(&self, ctx: &Context) -> DriverResult<Box<dyn RawTx>> {
        ctx.check()?;
        if self.inner.should_fail(&MemoryFailure::Begin) {
            return Err(DriverError::PoolExhausted { max: 0 });
        }
        self.inner.record("BEGIN");
        *self.inner.open.lock() += 1;
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            finished: false,
        }))
    }
}

struct MemoryTx {
    inner: Arc<MemoryInner>,
    finished: bool,
}

impl MemoryTx {
    fn run(&mut self, ctx: &Context, sql: &str) -> DriverResult<()> {
        if self.finished {
            return Err(DriverError::Closed);
        }
        ctx.check()?;
        self.inner.record(sql);
        if self.inner.statement_fails(sql) {
            return Err(DriverError::statement(sql, "scripted failure"));
        }
        Ok(())
    }

    fn finish(&mut self, sql: &str, failure: MemoryFailure) -> DriverResult<()> {
        if self.finished {
            return Err(DriverError::Closed);
        }
        self.finished = true;
        *self.inner.open.lock() -= 1;
        self.inner.record(sql);
        if self.inner.should_fail(&failure) {
            return Err(DriverError::statement(sql, "scripted failure"));
        }
        Ok(())
    }
}

impl RawTx for MemoryTx {
    fn query(&mut self, ctx: &Context, sql: &str, _args: &[Value]) -> DriverResult<ResultSet> {
        self.run(ctx, sql)?;
        Ok(self.inner.canned.lock().get(sql).cloned().unwrap_or_default())
    }

    fn exec(&mut self, ctx: &Context, sql: &str, _args: &[Value]) -> DriverResult<ExecResult> {
        self.run(ctx, sql)?;
        Ok(ExecResult::new(1))
    }

    fn prepare(&mut self, ctx: &Context, sql: &str) -> DriverResult<Prepared> {
        self.run(ctx, sql)?;
        Ok(Prepared {
            sql: sql.to_string(),
            param_count: sql.matches('?').count(),
        })
    }

    fn commit(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("COMMIT", MemoryFailure::Commit)
    }

    fn rollback(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("ROLLBACK", MemoryFailure::Rollback)
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            *self.inner.open.lock() -= 1;
        }
    }
}
