//! Connection pool and physical transactions over rusqlite.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{DriverError, DriverResult};
use super::result::{ExecResult, Record, ResultSet};
use super::{Driver, Prepared, RawTx};
use crate::context::Context;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file.
    pub path: PathBuf,
    /// Upper bound on open connections.
    pub max_connections: usize,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Enforce foreign keys on every connection.
    pub foreign_keys: bool,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            busy_timeout_ms: 5_000,
            foreign_keys: true,
        }
    }

    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    pub fn busy_timeout_ms(mut self, value: u64) -> Self {
        self.busy_timeout_ms = value;
        self
    }

    pub fn foreign_keys(mut self, value: bool) -> Self {
        self.foreign_keys = value;
        self
    }
}

struct PoolInner {
    config: SqliteConfig,
    idle: Mutex<VecDeque<Connection>>,
    created: Mutex<usize>,
}

impl PoolInner {
    fn connect(&self) -> DriverResult<Connection> {
        let conn = Connection::open(&self.config.path)
            .map_err(|e| DriverError::Connection(format!("{}: {e}", self.config.path.display())))?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        if self.config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON")?;
        }
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        if conn.is_autocommit() {
            self.idle.lock().push_back(conn);
            return;
        }
        // Never hand out a connection that is still inside a transaction.
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => self.idle.lock().push_back(conn),
            Err(e) => {
                warn!(error = %e, "discarding sqlite connection stuck in a transaction");
                *self.created.lock() -= 1;
            }
        }
    }
}

/// Bounded pool of sqlite connections.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct SqlitePool {
    inner: Arc<PoolInner>,
}

impl SqlitePool {
    /// Open the pool, eagerly creating its first connection.
    pub fn open(config: SqliteConfig) -> DriverResult<Self> {
        if config.max_connections == 0 {
            return Err(DriverError::Connection("max_connections must be at least 1".into()));
        }
        let inner = Arc::new(PoolInner {
            config,
            idle: Mutex::new(VecDeque::new()),
            created: Mutex::new(0),
        });
        let first = inner.connect()?;
        inner.idle.lock().push_back(first);
        *inner.created.lock() = 1;
        Ok(Self { inner })
    }

    fn acquire(&self) -> DriverResult<Connection> {
        if let Some(conn) = self.inner.idle.lock().pop_front() {
            return Ok(conn);
        }

        {
            let mut created = self.inner.created.lock();
            if *created < self.inner.config.max_connections {
                let conn = self.inner.connect()?;
                *created += 1;
                debug!(created = *created, "opened sqlite connection");
                return Ok(conn);
            }
        }

        let max = self.inner.config.max_connections;
        warn!(max, "sqlite connection pool exhausted");
        Err(DriverError::PoolExhausted { max })
    }

    /// Run `sql` outside any transaction, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> DriverResult<()> {
        let conn = self.acquire()?;
        let result = conn.execute_batch(sql).map_err(DriverError::from);
        self.inner.release(conn);
        result
    }

    /// Run a query outside any transaction.
    pub fn query(&self, sql: &str, args: &[Value]) -> DriverResult<ResultSet> {
        let conn = self.acquire()?;
        let result = query_rows(&conn, sql, args);
        self.inner.release(conn);
        result
    }

    /// Number of idle connections.
    pub fn available(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Number of connections opened and not discarded.
    pub fn created(&self) -> usize {
        *self.inner.created.lock()
    }
}

impl Driver for SqlitePool {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn begin(&self, ctx: &Context) -> DriverResult<Box<dyn RawTx>> {
        ctx.check()?;
        let conn = self.acquire()?;
        if let Err(e) = conn.execute_batch("BEGIN") {
            self.inner.release(conn);
            return Err(e.into());
        }
        Ok(Box::new(SqliteTx {
            conn: Some(conn),
            pool: self.inner.clone(),
        }))
    }
}

/// A transaction holding one pooled connection until it finalizes.
struct SqliteTx {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl SqliteTx {
    fn conn(&self) -> DriverResult<&Connection> {
        self.conn.as_ref().ok_or(DriverError::Closed)
    }

    fn finish(&mut self, sql: &str) -> DriverResult<()> {
        let conn = self.conn.take().ok_or(DriverError::Closed)?;
        let result = conn.execute_batch(sql).map_err(DriverError::from);
        // A failed COMMIT can leave sqlite inside the transaction; release
        // rolls that back before the connection is reused.
        self.pool.release(conn);
        result
    }
}

impl RawTx for SqliteTx {
    fn query(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<ResultSet> {
        ctx.check()?;
        query_rows(self.conn()?, sql, args)
    }

    fn exec(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<ExecResult> {
        ctx.check()?;
        let conn = self.conn()?;
        let params = bind_args(args)?;
        let mut stmt = conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(params))?;
        Ok(ExecResult::new(affected as u64).with_last_insert_id(conn.last_insert_rowid()))
    }

    fn prepare(&mut self, ctx: &Context, sql: &str) -> DriverResult<Prepared> {
        ctx.check()?;
        let stmt = self.conn()?.prepare_cached(sql)?;
        Ok(Prepared {
            sql: sql.to_string(),
            param_count: stmt.parameter_count(),
        })
    }

    fn commit(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> DriverResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("sqlite transaction dropped without commit or rollback");
            self.pool.release(conn);
        }
    }
}

fn query_rows(conn: &Connection, sql: &str, args: &[Value]) -> DriverResult<ResultSet> {
    let params = bind_args(args)?;
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut result = ResultSet::new(columns.clone());

    let mut rows = stmt.query(params_from_iter(params))?;
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), read_value(row.get_ref(i)?));
        }
        result.push(record);
    }
    Ok(result)
}

fn bind_args(args: &[Value]) -> DriverResult<Vec<SqlValue>> {
    args.iter().map(bind_arg).collect()
}

fn bind_arg(arg: &Value) -> DriverResult<SqlValue> {
    Ok(match arg {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => return Err(DriverError::UnsupportedArgument(n.to_string())),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Arrays and objects are stored as JSON text.
        other => SqlValue::Text(other.to_string()),
    })
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}
