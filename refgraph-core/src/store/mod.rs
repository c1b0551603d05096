//! Transactional store contract consumed by the reference manager.
//!
//! Backends provide scoped transactions ([`Database::transact`]) and a
//! transaction handle ([`Tx`]) that runs parameterized statements. An absent
//! row is reported with the [`Error::RowNotFound`] sentinel.

pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::context::Context;
use crate::error::{Error, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Snapshot reads, no writes allowed.
    ReadOnly,
    ReadWrite,
}

/// A statement parameter or a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Null,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

/// One result row, columns in SELECT order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn value(&self, idx: usize) -> Result<&Value> {
        self.values
            .get(idx)
            .ok_or_else(|| Error::InvalidOperation(format!("column {} out of range", idx)))
    }

    pub fn text(&self, idx: usize) -> Result<&str> {
        match self.value(idx)? {
            Value::Text(s) => Ok(s),
            other => Err(Error::InvalidOperation(format!(
                "column {} is not text: {:?}",
                idx, other
            ))),
        }
    }

    pub fn integer(&self, idx: usize) -> Result<i64> {
        match self.value(idx)? {
            Value::Integer(n) => Ok(*n),
            other => Err(Error::InvalidOperation(format!(
                "column {} is not an integer: {:?}",
                idx, other
            ))),
        }
    }
}

/// Decodes a domain value from a result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

/// Handle to an open transaction.
pub trait Tx {
    /// Run a statement returning rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a mutating statement, returning the number of affected rows.
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<usize>;
}

impl<'t> dyn Tx + 't {
    /// First row decoded as `T`, or [`Error::RowNotFound`].
    pub fn get<T: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<T> {
        let rows = self.query(sql, params)?;
        match rows.first() {
            Some(row) => T::from_row(row),
            None => Err(Error::RowNotFound),
        }
    }

    /// All rows decoded as `T`; an empty result is not an error.
    pub fn select<T: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        self.query(sql, params)?.iter().map(T::from_row).collect()
    }
}

/// A transactional backing store.
pub trait Database: Send + Sync {
    /// Run `f` inside one transaction.
    ///
    /// `ReadWrite` transactions commit when `f` succeeds. Any error from `f`,
    /// or a context that ended while `f` ran, rolls the transaction back and is
    /// returned unchanged.
    fn transact<T, F>(&self, ctx: &Context, mode: TxMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T>;
}

impl<D: Database> Database for Arc<D> {
    fn transact<T, F>(&self, ctx: &Context, mode: TxMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T>,
    {
        (**self).transact(ctx, mode, f)
    }
}

impl<D: Database> Database for &D {
    fn transact<T, F>(&self, ctx: &Context, mode: TxMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T>,
    {
        (**self).transact(ctx, mode, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row::new(vec![Value::from("a"), Value::from(3i64), Value::Null]);

        assert_eq!("a", row.text(0).unwrap());
        assert_eq!(3, row.integer(1).unwrap());
        assert!(row.text(1).is_err());
        assert!(row.text(2).is_err());
        assert!(row.value(3).is_err());
    }
}
