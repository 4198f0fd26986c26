//! Statement tracing.
//!
//! Every statement a transaction runs, including the physical `BEGIN`,
//! `COMMIT` and `ROLLBACK`, produces one [`SqlRecord`]. Records are handed
//! to an optional [`TraceSink`] and, in debug mode, written through
//! `tracing`. Delivery is fire-and-forget: a sink has no way to report
//! failure, so it can never change a transaction's outcome.

mod format;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::context::Context;

pub use format::format_sql;

/// What kind of call produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    #[serde(rename = "DB.Begin")]
    Begin,
    #[serde(rename = "TX.Commit")]
    Commit,
    #[serde(rename = "TX.Rollback")]
    Rollback,
    #[serde(rename = "TX.Query")]
    Query,
    #[serde(rename = "TX.Exec")]
    Exec,
    #[serde(rename = "TX.Prepare")]
    Prepare,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Begin => "DB.Begin",
            StatementKind::Commit => "TX.Commit",
            StatementKind::Rollback => "TX.Rollback",
            StatementKind::Query => "TX.Query",
            StatementKind::Exec => "TX.Exec",
            StatementKind::Prepare => "TX.Prepare",
        }
    }
}

/// One executed statement.
#[derive(Debug, Clone, Serialize)]
pub struct SqlRecord {
    /// SQL text as sent to the driver.
    pub sql: String,
    /// SQL text with arguments inlined.
    pub formatted: String,
    pub args: Vec<Value>,
    pub kind: StatementKind,
    /// Driver error message, if the statement failed.
    pub error: Option<String>,
    /// Unix millis before the call.
    pub start: i64,
    /// Unix millis after the call.
    pub end: i64,
    /// Database group the statement ran against.
    pub group: String,
    /// Handle that ran the statement; absent when `BEGIN` failed.
    pub tx_id: Option<String>,
    pub is_transaction: bool,
}

impl SqlRecord {
    /// Milliseconds spent in the driver.
    pub fn cost_ms(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Measures a driver call and turns it into a [`SqlRecord`].
pub(crate) struct Timer {
    start: i64,
}

impl Timer {
    pub(crate) fn start() -> Self {
        Self {
            start: Utc::now().timestamp_millis(),
        }
    }

    pub(crate) fn finish(
        self,
        kind: StatementKind,
        sql: &str,
        args: &[Value],
        error: Option<String>,
        group: &str,
        tx_id: Option<&str>,
    ) -> SqlRecord {
        SqlRecord {
            sql: sql.to_string(),
            formatted: format_sql(sql, args),
            args: args.to_vec(),
            kind,
            error,
            start: self.start,
            end: Utc::now().timestamp_millis(),
            group: group.to_string(),
            tx_id: tx_id.map(str::to_string),
            is_transaction: true,
        }
    }
}

/// Receives statement records.
pub trait TraceSink: Send + Sync {
    fn record(&self, ctx: &Context, record: &SqlRecord);
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SqlRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SqlRecord> {
        self.records.lock().clone()
    }

    /// SQL text of every record, in order.
    pub fn statements(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.sql.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl TraceSink for MemorySink {
    fn record(&self, _ctx: &Context, record: &SqlRecord) {
        self.records.lock().push(record.clone());
    }
}
