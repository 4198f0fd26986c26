//! Statement result types.

use std::collections::BTreeMap;

use serde_json::Value;

/// One row, keyed by column name.
pub type Record = BTreeMap<String, Value>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Number of rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Row id generated by the last insert, if the driver reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Rows as maps of column name to value.
    pub rows: Vec<Record>,
}

impl ResultSet {
    /// Create a new empty result set.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Create from rows, inferring columns from the first row.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn push(&mut self, row: Record) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    /// Value of the first selected column in the first row.
    ///
    /// Falls back to the first key in column-name order when the select
    /// order is unknown.
    pub fn first_value(&self) -> Option<&Value> {
        let row = self.rows.first()?;
        match self.columns.first() {
            Some(column) => row.get(column),
            None => row.values().next(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
