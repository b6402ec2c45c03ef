//! Column decoding that reports which table and column held a bad value.

use std::str::FromStr;

use rusqlite::types::FromSql;
use rusqlite::Row;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Reads columns from one row of `table`. Every failure becomes [`StoreError::CorruptRow`].
pub struct RowReader<'a, 'stmt> {
    row: &'a Row<'stmt>,
    table: &'static str,
}

impl<'a, 'stmt> RowReader<'a, 'stmt> {
    pub fn new(row: &'a Row<'stmt>, table: &'static str) -> Self {
        Self { row, table }
    }

    fn corrupt(&self, column: &'static str, detail: String) -> StoreError {
        StoreError::CorruptRow {
            table: self.table,
            column,
            detail,
        }
    }

    pub fn get<T: FromSql>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        self.row
            .get(idx)
            .map_err(|e| self.corrupt(column, e.to_string()))
    }

    pub fn opt<T: FromSql>(&self, idx: usize, column: &'static str) -> Result<Option<T>, StoreError> {
        self.get::<Option<T>>(idx, column)
    }

    /// Non-negative integer counters stored as INTEGER.
    pub fn count(&self, idx: usize, column: &'static str) -> Result<u64, StoreError> {
        let raw: i64 = self.get(idx, column)?;
        u64::try_from(raw).map_err(|_| self.corrupt(column, format!("negative count: {raw}")))
    }

    /// A JSON text column.
    pub fn json<T: DeserializeOwned>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        let raw: String = self.get(idx, column)?;
        self.decode_json(&raw, column)
    }

    /// A nullable JSON text column.
    pub fn opt_json<T: DeserializeOwned>(
        &self,
        idx: usize,
        column: &'static str,
    ) -> Result<Option<T>, StoreError> {
        self.opt::<String>(idx, column)?
            .map(|raw| self.decode_json(&raw, column))
            .transpose()
    }

    /// A text column holding a `FromStr` value such as an enum name.
    pub fn parsed<T: FromStr>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        let raw: String = self.get(idx, column)?;
        raw.parse()
            .map_err(|_| self.corrupt(column, format!("unknown variant: {raw}")))
    }

    fn decode_json<T: DeserializeOwned>(&self, raw: &str, column: &'static str) -> Result<T, StoreError> {
        serde_json::from_str(raw).map_err(|e| self.corrupt(column, format!("invalid JSON: {e}")))
    }
}
