//! SQLite reference adapter for the substrate contract.
//!
//! `open` gives a durable file-backed store, `open_in_memory` the
//! deterministic in-memory store used by the test harness. Both apply the
//! full schema (tables, composite FKs, append-only triggers) at open.

use std::cell::Cell;
use std::path::Path;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};

use crate::error::{CoreError, CoreResult};
use crate::store::{schema, Database, Row, SqlParams, Value};

pub struct SqliteStore {
    conn: Connection,
    tx_active: Cell<bool>,
}

impl SqliteStore {
    /// Open (or create) a file-backed store and apply the schema.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open a read-only handle on an existing store. Replay is read-only
    /// and safe to run concurrently with execution on disjoint keys.
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            tx_active: Cell::new(false),
        })
    }

    /// Open the deterministic in-memory store (test substrate).
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> CoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn,
            tx_active: Cell::new(false),
        })
    }

    fn bind<'a>(params: SqlParams<'a>) -> Vec<(String, &'a Value)> {
        params
            .iter()
            .map(|(name, value)| (format!(":{name}"), value))
            .collect()
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(value) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> CoreResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| CoreError::Substrate(format!("non-utf8 text column: {err}")))?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(CoreError::Substrate(
                "blob columns are not part of the substrate contract".to_string(),
            ))
        }
    })
}

impl Database for SqliteStore {
    fn fetch_one(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<Option<Row>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    fn fetch_all(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|name| name.to_string()).collect();

        let bound = Self::bind(params);
        let bound_refs: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), *value as &dyn ToSql))
            .collect();

        let mut rows = stmt.query(bound_refs.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(column_names.len());
            for (idx, name) in column_names.iter().enumerate() {
                columns.push((name.clone(), value_from_ref(row.get_ref(idx)?)?));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: SqlParams<'_>) -> CoreResult<()> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let bound = Self::bind(params);
        let bound_refs: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), *value as &dyn ToSql))
            .collect();
        stmt.execute(bound_refs.as_slice())?;
        Ok(())
    }

    fn begin(&self) -> CoreResult<()> {
        if self.tx_active.get() {
            return Ok(());
        }
        self.conn.execute_batch("BEGIN")?;
        self.tx_active.set(true);
        Ok(())
    }

    fn commit(&self) -> CoreResult<()> {
        if !self.tx_active.get() {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        self.tx_active.set(false);
        Ok(())
    }

    fn rollback(&self) -> CoreResult<()> {
        if !self.tx_active.get() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.tx_active.set(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_params_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute(
                "INSERT INTO account (account_code, base_currency, is_active)
                 VALUES (:code, 'USD', 1)",
                &[("code", Value::from("ACC_TEST"))],
            )
            .unwrap();
        let row = store
            .fetch_one(
                "SELECT account_id, account_code FROM account WHERE account_code = :code",
                &[("code", Value::from("ACC_TEST"))],
            )
            .unwrap()
            .expect("row");
        assert_eq!(row.get_str("account_code").unwrap(), "ACC_TEST");
        assert!(row.get_i64("account_id").unwrap() > 0);
    }

    #[test]
    fn transaction_rollback_discards_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.begin().unwrap();
        store
            .execute(
                "INSERT INTO account (account_code, base_currency, is_active)
                 VALUES ('ACC_TX', 'USD', 1)",
                &[],
            )
            .unwrap();
        store.rollback().unwrap();
        let row = store
            .fetch_one(
                "SELECT account_id FROM account WHERE account_code = 'ACC_TX'",
                &[],
            )
            .unwrap();
        assert!(row.is_none());
    }
}
