//! Prepared statements bound to a transaction.

use serde_json::Value;

use super::error::TransactionResult;
use super::handle::Tx;
use crate::driver::{DriverError, ExecResult, Prepared, ResultSet};

/// A statement prepared inside a transaction.
///
/// Every execution routes through the owning handle, so it is traced and
/// fails once the handle is finalized.
#[derive(Debug, Clone)]
pub struct Stmt {
    tx: Tx,
    prepared: Prepared,
}

impl Stmt {
    pub(crate) fn new(tx: Tx, prepared: Prepared) -> Self {
        Self { tx, prepared }
    }

    pub fn sql(&self) -> &str {
        &self.prepared.sql
    }

    pub fn param_count(&self) -> usize {
        self.prepared.param_count
    }

    fn check_args(&self, args: &[Value]) -> TransactionResult<()> {
        if args.len() != self.prepared.param_count {
            return Err(DriverError::ArgumentCount {
                expected: self.prepared.param_count,
                actual: args.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn query(&self, args: &[Value]) -> TransactionResult<ResultSet> {
        self.check_args(args)?;
        self.tx.query(&self.prepared.sql, args)
    }

    pub fn exec(&self, args: &[Value]) -> TransactionResult<ExecResult> {
        self.check_args(args)?;
        self.tx.exec(&self.prepared.sql, args)
    }
}
