//! SQLite connection handle.
//!
//! The crawl is single threaded, so one connection is shared through `Rc`.
//! Other processes writing the same catalog are serialized by SQLite; the busy
//! timeout bounds how long a statement waits for them.

use crate::error::{BackendError, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::OpenFlags;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug_span, info};

/// A bound parameter or a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(i64::from(v))
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_owned())
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DbValue::Null, Into::into)
    }
}

impl DbValue {
    fn kind(&self) -> &'static str {
        match self {
            DbValue::Null => "NULL",
            DbValue::Integer(_) => "integer",
            DbValue::Real(_) => "real",
            DbValue::Text(_) => "text",
            DbValue::Blob(_) => "blob",
            DbValue::Boolean(_) => "boolean",
        }
    }

    fn to_sqlite(&self) -> Value {
        match self {
            DbValue::Null => Value::Null,
            DbValue::Integer(v) => Value::Integer(*v),
            DbValue::Real(v) => Value::Real(*v),
            DbValue::Text(v) => Value::Text(v.clone()),
            DbValue::Blob(v) => Value::Blob(v.clone()),
            DbValue::Boolean(v) => Value::Integer(i64::from(*v)),
        }
    }

    fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => DbValue::Null,
            ValueRef::Integer(v) => DbValue::Integer(v),
            ValueRef::Real(v) => DbValue::Real(v),
            ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
        }
    }
}

/// One result row; columns keep their select order.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Rc<[String]>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Convert the value at `index`.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            BackendError::TypeConversion(format!("no column at index {}", index))
        })?;
        T::from_db_value(value)
    }

    /// Convert the value of column `name`.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| BackendError::TypeConversion(format!("no column named '{}'", name)))?;
        T::from_db_value(value)
    }

    /// Raw value at `index`.
    pub fn get_raw(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    /// Raw value of column `name`.
    pub fn value(&self, name: &str) -> Option<&DbValue> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|index| self.values.get(index))
    }

    /// `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Conversion out of a [`DbValue`]. NULL only converts into `Option<T>`.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &DbValue) -> Result<T> {
    Err(BackendError::TypeConversion(format!(
        "expected {}, found {}",
        expected,
        value.kind()
    )))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Boolean(v) => Ok(i64::from(*v)),
            other => mismatch("integer", other),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            other => mismatch("real", other),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            other => mismatch("boolean", other),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => mismatch("text", other),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Null => Ok(None),
            other => T::from_db_value(other).map(Some),
        }
    }
}

/// Handle on one SQLite catalog file.
#[derive(Clone)]
pub struct DbConnection {
    conn: Rc<rusqlite::Connection>,
    writable: bool,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("writable", &self.writable)
            .finish()
    }
}

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

impl DbConnection {
    /// Open or create the catalog at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// [`open`](Self::open) with a custom busy timeout in milliseconds.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        info!(path = %path.display(), "Opened catalog");
        Ok(Self::wrap(conn, true))
    }

    /// Open an existing catalog for reading only. Writes fail with
    /// [`BackendError::ReadOnly`].
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = rusqlite::Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        info!(path = %path.display(), "Opened catalog read-only");
        Ok(Self::wrap(conn, false))
    }

    /// Private in-memory catalog, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(rusqlite::Connection::open_in_memory()?, true))
    }

    fn wrap(conn: rusqlite::Connection, writable: bool) -> Self {
        Self {
            conn: Rc::new(conn),
            writable,
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(BackendError::ReadOnly)
        }
    }

    /// Run one statement; returns the number of changed rows.
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        self.ensure_writable()?;
        execute_on_conn(&self.conn, sql, params)
    }

    /// Run several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.ensure_writable()?;
        execute_batch_on_conn(&self.conn, sql)
    }

    /// Insert `rows` (values in `columns` order) in as few statements as
    /// the parameter limit allows.
    pub fn bulk_insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64> {
        self.ensure_writable()?;
        bulk_insert_on_conn(&self.conn, table, columns, rows)
    }

    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        query_on_conn(&self.conn, sql, params)
    }

    /// First column of the first row.
    pub fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T> {
        let rows = self.query_all(sql, params)?;
        let row = rows
            .first()
            .ok_or_else(|| BackendError::Query("scalar query returned no rows".to_string()))?;
        row.get(0)
    }

    /// Rowid assigned by the most recent successful INSERT on this handle.
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Run `op` between BEGIN and COMMIT; any error rolls everything back.
    pub fn transaction<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T>,
    {
        self.ensure_writable()?;
        self.conn.execute_batch("BEGIN")?;
        let mut tx = DbTransaction {
            conn: self.conn.as_ref(),
        };

        match op(&mut tx) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback) => Err(BackendError::Transaction(format!(
                    "{}; rollback also failed: {}",
                    err, rollback
                ))),
            },
        }
    }
}

/// Statements issued inside [`DbConnection::transaction`].
pub struct DbTransaction<'a> {
    conn: &'a rusqlite::Connection,
}

impl DbTransaction<'_> {
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch_on_conn(self.conn, sql)
    }

    pub fn bulk_insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64> {
        bulk_insert_on_conn(self.conn, table, columns, rows)
    }
}

fn bind(params: &[DbValue]) -> impl rusqlite::Params + '_ {
    rusqlite::params_from_iter(params.iter().map(DbValue::to_sqlite))
}

fn execute_on_conn(conn: &rusqlite::Connection, sql: &str, params: &[DbValue]) -> Result<u64> {
    let span = debug_span!(
        "db.exec",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let changed = conn.prepare(sql)?.execute(bind(params))?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(changed as u64)
}

fn execute_batch_on_conn(conn: &rusqlite::Connection, sql: &str) -> Result<()> {
    let span = debug_span!(
        "db.exec_batch",
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    conn.execute_batch(sql)?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(())
}

fn query_on_conn(conn: &rusqlite::Connection, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
    let span = debug_span!(
        "db.query",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        rows = tracing::field::Empty,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let columns: Rc<[String]> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(bind(params))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(DbValue::from_sqlite))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        result.push(DbRow {
            columns: Rc::clone(&columns),
            values,
        });
    }

    span.record("rows", result.len() as u64);
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(result)
}

// SQLITE_MAX_VARIABLE_NUMBER for builds older than 3.32.
const MAX_PARAMS: usize = 999;

fn bulk_insert_on_conn(
    conn: &rusqlite::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    if columns.is_empty() || columns.len() > MAX_PARAMS {
        return Err(BackendError::invalid_input(format!(
            "bulk insert needs 1..={} columns, got {}",
            MAX_PARAMS,
            columns.len()
        )));
    }
    if let Some((index, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns.len())
    {
        return Err(BackendError::invalid_input(format!(
            "row {} has {} values for {} columns",
            index,
            row.len(),
            columns.len()
        )));
    }

    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_ident_path(table),
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
    );
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

    let mut inserted = 0;
    for chunk in rows.chunks(MAX_PARAMS / columns.len()) {
        let sql = format!("{}{}", head, vec![placeholders.as_str(); chunk.len()].join(", "));
        let params: Vec<DbValue> = chunk.iter().flatten().cloned().collect();
        execute_on_conn(conn, &sql, &params)?;
        inserted += chunk.len() as u64;
    }
    Ok(inserted)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each part of a dotted `schema.table` name.
pub(crate) fn quote_ident_path(path: &str) -> String {
    path.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

// FNV-1a, so spans can be grouped by statement without logging the SQL.
fn hash_sql(sql: &str) -> String {
    let hash = sql.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{:016x}", hash)
}
