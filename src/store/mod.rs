//! Substrate contract: a minimal typed key-value-over-SQL interface.
//!
//! The core depends only on this trait (named-parameter `fetch_one` /
//! `fetch_all` / `execute` plus transaction control). The SQLite adapter
//! in [`sqlite`] is the reference implementation; `open_in_memory` is the
//! deterministic in-memory substrate used by tests.

pub mod schema;
pub mod sqlite;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::canonical::{canonical_decimal_str, normalize_timestamp, parse_timestamp};
use crate::error::{CoreError, CoreResult};

pub use sqlite::SqliteStore;

/// One bound SQL value. Decimals, timestamps, and UUIDs travel as their
/// canonical text renderings so string equality is exact value equality.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Text(canonical_decimal_str(value))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Text(normalize_timestamp(value))
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// One fetched row: column names in query order with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    fn required(&self, name: &str) -> CoreResult<&Value> {
        self.get(name)
            .ok_or_else(|| CoreError::Substrate(format!("missing column {name:?} in result row")))
    }

    pub fn get_i64(&self, name: &str) -> CoreResult<i64> {
        match self.required(name)? {
            Value::Integer(value) => Ok(*value),
            Value::Text(value) => value.parse::<i64>().map_err(|_| {
                CoreError::Substrate(format!("column {name:?} is not an integer: {value:?}"))
            }),
            other => Err(CoreError::Substrate(format!(
                "column {name:?} is not an integer: {other:?}"
            ))),
        }
    }

    pub fn get_opt_i64(&self, name: &str) -> CoreResult<Option<i64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_i64(name).map(Some),
        }
    }

    pub fn get_bool(&self, name: &str) -> CoreResult<bool> {
        Ok(self.get_i64(name)? != 0)
    }

    pub fn get_str(&self, name: &str) -> CoreResult<String> {
        match self.required(name)? {
            Value::Text(value) => Ok(value.clone()),
            Value::Integer(value) => Ok(value.to_string()),
            other => Err(CoreError::Substrate(format!(
                "column {name:?} is not text: {other:?}"
            ))),
        }
    }

    pub fn get_opt_str(&self, name: &str) -> CoreResult<Option<String>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_str(name).map(Some),
        }
    }

    pub fn get_decimal(&self, name: &str) -> CoreResult<Decimal> {
        let raw = self.get_str(name)?;
        Decimal::from_str(&raw).map_err(|err| {
            CoreError::Substrate(format!("column {name:?} is not a decimal ({raw:?}): {err}"))
        })
    }

    pub fn get_opt_decimal(&self, name: &str) -> CoreResult<Option<Decimal>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_decimal(name).map(Some),
        }
    }

    pub fn get_timestamp(&self, name: &str) -> CoreResult<DateTime<Utc>> {
        let raw = self.get_str(name)?;
        parse_timestamp(&raw)
            .map_err(|err| CoreError::Substrate(format!("column {name:?}: {err}")))
    }

    pub fn get_uuid(&self, name: &str) -> CoreResult<Uuid> {
        let raw = self.get_str(name)?;
        Uuid::parse_str(&raw).map_err(|err| {
            CoreError::Substrate(format!("column {name:?} is not a uuid ({raw:?}): {err}"))
        })
    }

    pub fn get_opt_uuid(&self, name: &str) -> CoreResult<Option<Uuid>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_uuid(name).map(Some),
        }
    }

    /// Parse an enum column through its wire representation.
    pub fn get_enum<E>(&self, name: &str) -> CoreResult<E>
    where
        E: FromStr<Err = CoreError>,
    {
        E::from_str(&self.get_str(name)?)
    }

    pub fn get_opt_enum<E>(&self, name: &str) -> CoreResult<Option<E>>
    where
        E: FromStr<Err = CoreError>,
    {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_enum(name).map(Some),
        }
    }
}

/// Named query parameters. Names are bare (no `:` prefix).
pub type SqlParams<'a> = &'a [(&'a str, Value)];

/// Minimal substrate contract consumed by the core.
pub trait Database {
    fn fetch_one(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<Option<Row>>;
    fn fetch_all(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<Vec<Row>>;
    fn execute(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<()>;

    fn begin(&self) -> CoreResult<()>;
    fn commit(&self) -> CoreResult<()>;
    fn rollback(&self) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn value_conversions_are_canonical() {
        assert_eq!(
            Value::from(dec!(1.5)),
            Value::Text("1.500000000000000000".to_string())
        );
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }

    #[test]
    fn row_typed_accessors() {
        let row = Row::new(vec![
            ("count".to_string(), Value::Integer(3)),
            ("qty".to_string(), Value::Text("0.500000000000000000".into())),
            ("maybe".to_string(), Value::Null),
        ]);
        assert_eq!(row.get_i64("count").unwrap(), 3);
        assert_eq!(row.get_decimal("qty").unwrap(), dec!(0.5));
        assert_eq!(row.get_opt_str("maybe").unwrap(), None);
        assert!(row.get_str("absent").is_err());
    }
}
