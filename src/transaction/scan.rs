//! Convenience queries on a transaction handle.
//!
//! Everything here is built on [`Tx::query`], so it shares its tracing and
//! finalization checks. Rows decode into caller types through serde: each
//! [`Record`] is turned into a JSON object and deserialized from there.

use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlparser::ast::{GroupByExpr, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::error::{TransactionError, TransactionResult};
use super::handle::Tx;
use crate::driver::{Record, ResultSet};

/// How many rows a [`Scan`] target consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanShape {
    /// Only the first row, if any.
    SingleRecord,
    /// Every row.
    RecordList,
}

/// A target that [`Tx::get_scan`] can fill.
pub trait Scan: Sized {
    const SHAPE: ScanShape;

    fn from_records(records: Vec<Record>) -> TransactionResult<Self>;
}

impl<T: DeserializeOwned> Scan for Option<T> {
    const SHAPE: ScanShape = ScanShape::SingleRecord;

    fn from_records(records: Vec<Record>) -> TransactionResult<Self> {
        records.into_iter().next().map(decode).transpose()
    }
}

impl<T: DeserializeOwned> Scan for Vec<T> {
    const SHAPE: ScanShape = ScanShape::RecordList;

    fn from_records(records: Vec<Record>) -> TransactionResult<Self> {
        records.into_iter().map(decode).collect()
    }
}

fn decode<T: DeserializeOwned>(record: Record) -> TransactionResult<T> {
    let object = Value::Object(record.into_iter().collect());
    Ok(serde_json::from_value(object)?)
}

impl Tx {
    /// All rows of a query.
    pub fn get_all(&self, sql: &str, args: &[Value]) -> TransactionResult<ResultSet> {
        self.query(sql, args)
    }

    /// The first row of a query.
    pub fn get_one(&self, sql: &str, args: &[Value]) -> TransactionResult<Option<Record>> {
        Ok(self.query(sql, args)?.into_iter().next())
    }

    /// The first column of the first row of a query.
    pub fn get_value(&self, sql: &str, args: &[Value]) -> TransactionResult<Option<Value>> {
        Ok(self.query(sql, args)?.first_value().cloned())
    }

    /// Number of rows `sql` would return.
    ///
    /// A query that already selects `COUNT(..)` runs as is; any other query
    /// is rewritten into one that counts its rows.
    pub fn get_count(&self, sql: &str, args: &[Value]) -> TransactionResult<i64> {
        let sql = count_query(sql)?;
        match self.get_value(&sql, args)? {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| TransactionError::Count(format!("count is not an integer: {n}"))),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| TransactionError::Count(format!("count is not an integer: {s}"))),
            Some(other) => Err(TransactionError::Count(format!("count is not an integer: {other}"))),
        }
    }

    /// The first row decoded into `T`.
    pub fn get_struct<T: DeserializeOwned>(&self, sql: &str, args: &[Value]) -> TransactionResult<Option<T>> {
        self.get_scan(sql, args)
    }

    /// Every row decoded into `T`.
    pub fn get_structs<T: DeserializeOwned>(&self, sql: &str, args: &[Value]) -> TransactionResult<Vec<T>> {
        self.get_scan(sql, args)
    }

    /// Decode a query into `S`, reading one row or all of them depending on
    /// [`Scan::SHAPE`].
    pub fn get_scan<S: Scan>(&self, sql: &str, args: &[Value]) -> TransactionResult<S> {
        let rows = self.query(sql, args)?.rows;
        let records = match S::SHAPE {
            ScanShape::SingleRecord => rows.into_iter().take(1).collect(),
            ScanShape::RecordList => rows,
        };
        S::from_records(records)
    }
}

/// Rewrite a select into a query returning its row count.
pub(crate) fn count_query(sql: &str) -> TransactionResult<String> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql).map_err(|e| TransactionError::Count(e.to_string()))?;
    if statements.len() != 1 {
        return Err(TransactionError::Count(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }
    let Statement::Query(query) = &mut statements[0] else {
        return Err(TransactionError::Count("not a query".into()));
    };
    let query = &mut **query;
    let paged = query.limit.is_some() || query.offset.is_some() || query.fetch.is_some();

    if let SetExpr::Select(select) = query.body.as_mut() {
        if is_count(&select.projection) {
            return Ok(sql.to_string());
        }
        let grouped = !matches!(&select.group_by, GroupByExpr::Expressions(exprs, ..) if exprs.is_empty());
        if !paged && select.distinct.is_none() && !grouped && select.having.is_none() {
            let count = Parser::new(&dialect)
                .try_with_sql("COUNT(*)")
                .and_then(|mut parser| parser.parse_expr())
                .map_err(|e| TransactionError::Count(e.to_string()))?;
            select.projection = vec![SelectItem::UnnamedExpr(count)];
            query.order_by = None;
            return Ok(query.to_string());
        }
    }

    // Paged, distinct, grouped and compound queries are counted from the
    // outside. ORDER BY only matters to a page.
    if !paged {
        query.order_by = None;
    }
    Ok(format!("SELECT COUNT(*) FROM ({query}) AS count_rows"))
}

fn is_count(projection: &[SelectItem]) -> bool {
    match projection {
        [SelectItem::UnnamedExpr(expr)] | [SelectItem::ExprWithAlias { expr, .. }] => {
            expr.to_string().to_uppercase().starts_with("COUNT(")
        }
        _ => false,
    }
}
