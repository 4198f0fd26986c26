//! The database handle for one configured group.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::config::DatabaseConfig;
use super::dialect::Dialect;
use crate::context::Context;
use crate::driver::Driver;
use crate::trace::{SqlRecord, TraceSink};
use crate::transaction::{self, TransactionError, TransactionResult, Tx};

struct DatabaseInner {
    config: DatabaseConfig,
    driver: Arc<dyn Driver>,
    sink: Option<Arc<dyn TraceSink>>,
    ctx: Context,
}

/// One database group: a driver plus its configuration.
///
/// Cloning is cheap; clones share the driver.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create a database over `driver`.
    pub fn new(driver: impl Driver + 'static, config: DatabaseConfig) -> Self {
        Self::from_shared(Arc::new(driver), config)
    }

    /// Create a database over a driver shared with other groups.
    pub fn from_shared(driver: Arc<dyn Driver>, config: DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                driver,
                sink: None,
                ctx: Context::background(),
            }),
        }
    }

    fn rebuild(&self, sink: Option<Arc<dyn TraceSink>>, ctx: Context) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config: self.inner.config.clone(),
                driver: self.inner.driver.clone(),
                sink,
                ctx,
            }),
        }
    }

    /// This database with every statement record also sent to `sink`.
    pub fn with_trace_sink(&self, sink: Arc<dyn TraceSink>) -> Self {
        self.rebuild(Some(sink), self.inner.ctx.clone())
    }

    /// This database with `ctx` as the default context.
    pub fn with_ctx(&self, ctx: Context) -> Self {
        self.rebuild(self.inner.sink.clone(), ctx)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn group(&self) -> &str {
        &self.inner.config.group
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.config.dialect
    }

    /// Default context, used when a caller supplies an empty one.
    pub fn ctx(&self) -> &Context {
        &self.inner.ctx
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.inner.driver.as_ref()
    }

    /// Begin a transaction under the default context.
    ///
    /// The caller must commit or roll back the returned handle; dropping it
    /// while open rolls back.
    pub fn begin(&self) -> TransactionResult<Tx> {
        self.begin_ctx(self.ctx())
    }

    /// Begin a transaction under `ctx`.
    ///
    /// The handle is not bound into `ctx`; use
    /// [`with_tx`](crate::transaction::with_tx) to make nested units find it.
    pub fn begin_ctx(&self, ctx: &Context) -> TransactionResult<Tx> {
        Tx::begin(self, ctx)
    }

    /// Run `f` as a unit of work under the default context.
    ///
    /// See [`transaction_ctx`](Self::transaction_ctx).
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Context, &Tx) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let ctx = self.ctx().clone();
        self.transaction_ctx(&ctx, f)
    }

    /// Run `f` as a unit of work under `ctx`.
    ///
    /// If `ctx` already carries a transaction of this group, `f` runs inside
    /// a save point of it. Otherwise a new transaction is begun, bound into
    /// the context passed to `f`, and committed if `f` returns `Ok` or rolled
    /// back if it returns `Err` or panics. An empty `ctx` is replaced with
    /// the default context.
    ///
    /// Do not commit or roll back the handle inside `f`.
    pub fn transaction_ctx<F, T, E>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(&Context, &Tx) -> Result<T, E>,
        E: From<TransactionError>,
    {
        transaction::run_in_database(self, ctx, f)
    }

    /// Deliver a statement record to the sink and, in debug mode, the log.
    ///
    /// A panicking sink is logged and otherwise ignored.
    pub(crate) fn record(&self, ctx: &Context, record: SqlRecord) {
        if let Some(sink) = &self.inner.sink {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| sink.record(ctx, &record)));
            if delivered.is_err() {
                warn!(group = %record.group, kind = record.kind.as_str(), "trace sink panicked, record dropped");
            }
        }
        if !self.inner.config.debug {
            return;
        }
        let tx_id = record.tx_id.as_deref().unwrap_or("-");
        match &record.error {
            Some(err) => error!(
                group = %record.group,
                tx_id,
                kind = record.kind.as_str(),
                sql = %record.formatted,
                cost_ms = record.cost_ms(),
                error = %err,
                "sql failed"
            ),
            None => debug!(
                group = %record.group,
                tx_id,
                kind = record.kind.as_str(),
                sql = %record.formatted,
                cost_ms = record.cost_ms(),
                "sql"
            ),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("group", &self.group())
            .field("driver", &self.inner.driver.name())
            .field("dialect", &self.dialect())
            .field("debug", &self.inner.config.debug)
            .finish()
    }
}
