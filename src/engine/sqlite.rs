use std::{sync::Mutex, time::Duration};

use log::{debug, info};
use rusqlite::{
    Connection, OpenFlags, Statement,
    types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef},
};
use uuid::Uuid;

use super::{Engine, EngineError, Handle, RowSet};
use crate::columnar::Field;
use crate::config::DatabaseConfig;
use crate::protocol::QueryKind;
use crate::types::{ColumnType, Value};

/// An embedded SQLite database shared by every session.
///
/// Without a path the database lives in memory under a unique shared-cache
/// name, so every duplicated handle sees the same tables. The root
/// connection is held only to keep that database alive.
#[derive(Debug)]
pub struct SqliteEngine {
    target: String,
    busy_timeout: Duration,
    _root: Mutex<Connection>,
}

impl SqliteEngine {
    pub fn open(config: &DatabaseConfig) -> Result<Self, EngineError> {
        let target = match &config.path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => format!("file:tether-{}?mode=memory&cache=shared", Uuid::new_v4()),
        };
        let root = connect(&target, config.busy_timeout)?;
        info!(
            "opened database {}",
            config
                .path
                .as_ref()
                .map_or_else(|| "(in memory)".to_string(), |p| p.display().to_string())
        );

        Ok(Self {
            target,
            busy_timeout: config.busy_timeout,
            _root: Mutex::new(root),
        })
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        Self::open(&DatabaseConfig::default())
    }
}

fn connect(target: &str, busy_timeout: Duration) -> Result<Connection, EngineError> {
    let conn = Connection::open_with_flags(target, OpenFlags::default())?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

impl Engine for SqliteEngine {
    type Handle = SqliteHandle;

    fn duplicate_handle(&self) -> Result<SqliteHandle, EngineError> {
        let conn = connect(&self.target, self.busy_timeout)?;
        debug!("duplicated database handle");
        Ok(SqliteHandle {
            conn,
            auto_commit: true,
        })
    }
}

/// A session's private SQLite connection.
#[derive(Debug)]
pub struct SqliteHandle {
    conn: Connection,
    auto_commit: bool,
}

impl SqliteHandle {
    /// With auto-commit off there is always an open transaction, even after
    /// SQLite rolled one back on its own because a statement failed.
    fn ensure_transaction(&mut self) -> Result<(), EngineError> {
        if !self.auto_commit && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn finish_transaction(&mut self, sql: &str) -> Result<(), EngineError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch(sql)?;
        }
        self.ensure_transaction()
    }
}

impl Handle for SqliteHandle {
    fn prepare(&mut self, sql: &str) -> Result<QueryKind, EngineError> {
        let stmt = self.conn.prepare_cached(sql)?;
        let kind = if stmt.column_count() > 0 {
            QueryKind::QueryResult
        } else if stmt.readonly() {
            QueryKind::Nothing
        } else {
            QueryKind::ChangedRows
        };
        Ok(kind)
    }

    fn execute_query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet, EngineError> {
        self.ensure_transaction()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        bind(&mut stmt, params)?;

        let columns: Vec<(String, Option<ColumnType>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().and_then(declared_type)))
            .collect();

        let mut out = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_sqlite(row.get_ref(i)?));
            }
            out.push(values);
        }

        let fields: Vec<Field> = columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, declared))| {
                let ty = declared.unwrap_or_else(|| infer_type(&out, i));
                Field::new(name, ty)
            })
            .collect();

        Ok(RowSet { fields, rows: out })
    }

    fn execute_update(&mut self, sql: &str, params: &[Value]) -> Result<u64, EngineError> {
        self.ensure_transaction()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        bind(&mut stmt, params)?;

        if stmt.column_count() > 0 {
            let mut rows = stmt.raw_query();
            while rows.next()?.is_some() {}
            return Ok(0);
        }
        let changed = stmt.raw_execute()?;
        Ok(if reports_changes(sql) { changed as u64 } else { 0 })
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), EngineError> {
        if auto_commit == self.auto_commit {
            return Ok(());
        }
        self.auto_commit = auto_commit;
        if auto_commit {
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("COMMIT")?;
            }
            Ok(())
        } else {
            self.ensure_transaction()
        }
    }

    fn commit(&mut self) -> Result<(), EngineError> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        self.finish_transaction("ROLLBACK")
    }
}

fn bind(stmt: &mut Statement<'_>, params: &[Value]) -> Result<(), EngineError> {
    let expected = stmt.parameter_count();
    if expected != params.len() {
        return Err(EngineError::ParameterCount {
            expected,
            found: params.len(),
        });
    }
    for (i, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)
            .map_err(|e| EngineError::Conversion {
                position: i + 1,
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

/// SQLite only updates its change counter for DML, so anything else would
/// report the count left over from an earlier statement.
fn reports_changes(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "WITH"
    )
}

/// SQLite stores every integer in 64 bits and every real as a double, so
/// the generic `INTEGER` and `REAL` declarations are widened accordingly.
fn declared_type(decl: &str) -> Option<ColumnType> {
    match ColumnType::from_sql_name(decl)? {
        ColumnType::Integer => Some(ColumnType::BigInt),
        ColumnType::Float => Some(ColumnType::Double),
        other => Some(other),
    }
}

/// Type of an expression column, taken from its first non-null value.
fn infer_type(rows: &[Vec<Value>], column: usize) -> ColumnType {
    rows.iter()
        .filter_map(|row| row.get(column))
        .find(|v| !v.is_null())
        .and_then(Value::natural_type)
        .unwrap_or(ColumnType::Varchar)
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(r) => Value::Float64(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Varchar(String::from_utf8_lossy(t).into_owned()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => SqlValue::Null,
            Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
            Value::Int8(v) => SqlValue::Integer((*v).into()),
            Value::Int16(v) => SqlValue::Integer((*v).into()),
            Value::Int32(v) => SqlValue::Integer((*v).into()),
            Value::Int64(v) => SqlValue::Integer(*v),
            Value::UInt8(v) => SqlValue::Integer((*v).into()),
            Value::UInt16(v) => SqlValue::Integer((*v).into()),
            Value::UInt32(v) => SqlValue::Integer((*v).into()),
            Value::UInt64(v) => match i64::try_from(*v) {
                Ok(v) => SqlValue::Integer(v),
                Err(_) => SqlValue::Text(v.to_string()),
            },
            Value::Int128(v) => match i64::try_from(*v) {
                Ok(v) => SqlValue::Integer(v),
                Err(_) => SqlValue::Text(v.to_string()),
            },
            Value::Float32(v) => SqlValue::Real((*v).into()),
            Value::Float64(v) => SqlValue::Real(*v),
            Value::Varchar(s) => return Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            Value::Decimal(_)
            | Value::Date(_)
            | Value::Time(_)
            | Value::Timestamp(_)
            | Value::TimestampTz(_) => SqlValue::Text(self.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempdir::TempDir;

    use super::*;

    fn count(handle: &mut SqliteHandle, table: &str) -> Value {
        let rows = handle
            .execute_query(&format!("SELECT COUNT(*) FROM {table}"), &[])
            .unwrap();
        rows.rows[0][0].clone()
    }

    #[test]
    fn select_literal() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut handle = engine.duplicate_handle().unwrap();

        assert_eq!(handle.prepare("SELECT 42").unwrap(), QueryKind::QueryResult);
        let rows = handle.execute_query("SELECT 42", &[]).unwrap();
        assert_eq!(rows.fields, vec![Field::new("42", ColumnType::BigInt)]);
        assert_eq!(rows.rows, vec![vec![Value::Int64(42)]]);
    }

    #[test]
    fn classifies_statements() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut handle = engine.duplicate_handle().unwrap();
        handle.execute_update("CREATE TABLE t (x INTEGER)", &[]).unwrap();

        let inputs = vec![
            ("SELECT x FROM t", QueryKind::QueryResult),
            ("UPDATE t SET x = 1", QueryKind::ChangedRows),
            ("INSERT INTO t VALUES (?)", QueryKind::ChangedRows),
            ("CREATE TABLE u (y TEXT)", QueryKind::ChangedRows),
            ("BEGIN", QueryKind::Nothing),
        ];
        for (sql, expected) in inputs {
            assert_eq!(handle.prepare(sql).unwrap(), expected, "{sql}");
        }

        assert!(handle.prepare("SELEC 1").is_err());
    }

    #[test]
    fn handles_share_one_database() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut first = engine.duplicate_handle().unwrap();
        let mut second = engine.duplicate_handle().unwrap();

        first.execute_update("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        let changed = first
            .execute_update("INSERT INTO t VALUES (1), (2), (3)", &[])
            .unwrap();
        assert_eq!(changed, 3);

        let updated = second
            .execute_update("UPDATE t SET x = x + 1 WHERE x > ?", &[Value::Int32(1)])
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(count(&mut first, "t"), Value::Int64(3));

        let created = second
            .execute_update("CREATE TABLE u (y TEXT)", &[])
            .unwrap();
        assert_eq!(created, 0);
    }

    #[test]
    fn declared_types_and_parameters() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut handle = engine.duplicate_handle().unwrap();
        handle
            .execute_update(
                "CREATE TABLE items (id INTEGER, price DECIMAL(10, 2), seen TIMESTAMP, ok BOOLEAN)",
                &[],
            )
            .unwrap();

        let seen = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        handle
            .execute_update("INSERT INTO items VALUES (?, ?, ?, ?)", &[
                Value::Int32(1),
                Value::Decimal("9.99".parse().unwrap()),
                Value::Timestamp(seen),
                Value::Boolean(true),
            ])
            .unwrap();

        let rows = handle.execute_query("SELECT * FROM items", &[]).unwrap();
        let types: Vec<ColumnType> = rows.fields.iter().map(|f| f.column_type).collect();
        assert_eq!(types, vec![
            ColumnType::BigInt,
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            },
            ColumnType::Timestamp,
            ColumnType::Boolean,
        ]);
        assert_eq!(rows.rows[0], vec![
            Value::Int64(1),
            Value::Float64(9.99),
            Value::Varchar("2024-05-06T07:08:09".into()),
            Value::Int64(1),
        ]);
    }

    #[test]
    fn parameter_count_is_checked() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut handle = engine.duplicate_handle().unwrap();

        let err = handle.execute_query("SELECT ?", &[]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ParameterCount {
                expected: 1,
                found: 0
            }
        ));
    }

    #[test]
    fn manual_transactions() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut handle = engine.duplicate_handle().unwrap();
        let mut observer = engine.duplicate_handle().unwrap();
        handle.execute_update("CREATE TABLE t (x INTEGER)", &[]).unwrap();

        handle.set_auto_commit(false).unwrap();
        handle.execute_update("INSERT INTO t VALUES (1)", &[]).unwrap();
        handle.rollback().unwrap();
        assert_eq!(count(&mut handle, "t"), Value::Int64(0));

        handle.execute_update("INSERT INTO t VALUES (2)", &[]).unwrap();
        handle.commit().unwrap();
        assert_eq!(count(&mut observer, "t"), Value::Int64(1));

        handle.execute_update("INSERT INTO t VALUES (3)", &[]).unwrap();
        handle.set_auto_commit(true).unwrap();
        assert!(handle.auto_commit());
        assert_eq!(count(&mut observer, "t"), Value::Int64(2));
    }

    #[test]
    fn file_database_persists() {
        let dir = TempDir::new("tether-engine").unwrap();
        let config = DatabaseConfig {
            path: Some(dir.path().join("data.db")),
            ..DatabaseConfig::default()
        };

        {
            let engine = SqliteEngine::open(&config).unwrap();
            let mut handle = engine.duplicate_handle().unwrap();
            handle
                .execute_update("CREATE TABLE notes (body TEXT)", &[])
                .unwrap();
            handle
                .execute_update("INSERT INTO notes VALUES (?)", &[Value::Varchar("kept".into())])
                .unwrap();
        }

        let engine = SqliteEngine::open(&config).unwrap();
        let mut handle = engine.duplicate_handle().unwrap();
        let rows = handle.execute_query("SELECT body FROM notes", &[]).unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Varchar("kept".into())]]);
        assert_eq!(rows.fields[0].column_type, ColumnType::Varchar);
    }
}
