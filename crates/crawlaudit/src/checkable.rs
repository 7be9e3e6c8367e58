//! Catalog entries and their persistence state machine.
//!
//! A [`Checkable`] is one path's record in the `checkables` table. Entries are
//! identified by `(path, type)` only; every other field is state that the
//! crawl driver updates and writes back through [`Checkable::persist`].

use crate::config::default_probability;
use crate::error::{AuditError, Result};
use crate::fdparse::EntryDescriptor;
use crawlaudit_db::{DbConnection, DbRow, DbValue, FromDbValue, Select};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use tracing::{debug, info, warn};

/// Catalog table name.
pub const TABLE: &str = "checkables";

/// Column definitions for the catalog table.
///
/// `path` is deliberately not unique: duplicate rows must stay detectable.
pub const COLUMNS: &[&str] = &[
    "path TEXT NOT NULL",
    "type TEXT NOT NULL",
    "cos TEXT NOT NULL DEFAULT ''",
    "cart TEXT",
    "checksum INTEGER NOT NULL DEFAULT 0",
    "last_check INTEGER NOT NULL DEFAULT 0",
    "fails INTEGER NOT NULL DEFAULT 0",
    "probability REAL NOT NULL DEFAULT 0.1",
    "reported INTEGER NOT NULL DEFAULT 0",
];

/// Writable fields, in [`Checkable::field_values`] order.
pub const FIELDS: &[&str] = &[
    "path",
    "type",
    "cos",
    "cart",
    "checksum",
    "last_check",
    "fails",
    "probability",
    "reported",
];

/// Fields selected when hydrating entries from the store.
pub const SELECT_FIELDS: &[&str] = &[
    "rowid",
    "path",
    "type",
    "cos",
    "cart",
    "checksum",
    "last_check",
    "fails",
    "probability",
    "reported",
];

// Fields `load` copies from the stored row.
const LOADED_FIELDS: &[&str] = &["rowid", "cos", "cart", "checksum", "last_check", "fails"];

/// Entry type: `'f'` or `'d'` in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "f",
            EntryKind::Directory => "d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "f" => Some(EntryKind::File),
            "d" => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct Checkable {
    /// Store identity; `None` until the first successful write or load.
    pub rowid: Option<i64>,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Class-of-service code, empty when unknown.
    pub cos: String,
    /// Media identifier.
    pub cart: Option<String>,
    /// Selected for checksum verification.
    pub checksum: bool,
    /// Epoch seconds of the last verification; 0 = never.
    pub last_check: i64,
    /// Consecutive failures.
    pub fails: i64,
    /// Sampling weight.
    pub probability: f64,
    /// Owned by downstream reporting.
    pub reported: bool,
}

impl PartialEq for Checkable {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.kind == other.kind
    }
}

impl Eq for Checkable {}

impl Hash for Checkable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.kind.hash(state);
    }
}

impl Checkable {
    /// A fresh, unidentified entry.
    pub fn new(path: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            rowid: None,
            path: path.into(),
            kind,
            cos: String::new(),
            cart: None,
            checksum: false,
            last_check: 0,
            fails: 0,
            probability: default_probability(),
            reported: false,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::Directory)
    }

    /// Replace the sampling weight, e.g. with the configured default.
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn from_descriptor(desc: EntryDescriptor) -> Self {
        let mut entry = Self::new(desc.path, desc.kind);
        entry.cos = desc.cos;
        entry.cart = desc.cart;
        entry
    }

    /// Build an entry from named attributes; unknown names are rejected.
    pub fn with_attrs<'a, I>(path: impl Into<String>, kind: EntryKind, attrs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, DbValue)>,
    {
        let mut entry = Self::new(path, kind);
        for (name, value) in attrs {
            entry.set_attr(name, value)?;
        }
        Ok(entry)
    }

    /// Hydrate an entry from a store row selected with (a subset of) [`SELECT_FIELDS`].
    pub fn from_row(row: &DbRow) -> Result<Self> {
        let path: String = attr_value("path", row_value(row, "path")?)?;
        let kind = parse_kind(row_value(row, "type")?)?;
        let mut entry = Self::new(path, kind);
        for (name, value) in row.iter() {
            if name == "path" || name == "type" {
                continue;
            }
            entry.set_attr(name, value.clone())?;
        }
        Ok(entry)
    }

    /// Set one attribute by its column name.
    pub fn set_attr(&mut self, name: &str, value: DbValue) -> Result<()> {
        match name {
            "rowid" => self.rowid = attr_value(name, &value)?,
            "path" => self.path = attr_value(name, &value)?,
            "type" => self.kind = parse_kind(&value)?,
            "cos" => self.cos = attr_value::<Option<String>>(name, &value)?.unwrap_or_default(),
            "cart" => self.cart = attr_value(name, &value)?,
            "checksum" => self.checksum = attr_value::<Option<bool>>(name, &value)?.unwrap_or(false),
            "last_check" => self.last_check = attr_value::<Option<i64>>(name, &value)?.unwrap_or(0),
            "fails" => self.fails = attr_value::<Option<i64>>(name, &value)?.unwrap_or(0),
            "probability" => {
                self.probability =
                    attr_value::<Option<f64>>(name, &value)?.unwrap_or_else(default_probability)
            }
            "reported" => self.reported = attr_value::<Option<bool>>(name, &value)?.unwrap_or(false),
            other => {
                return Err(AuditError::invalid_attribute(format!(
                    "'{}' is not a catalog entry attribute",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Values for [`FIELDS`], in order.
    pub fn field_values(&self) -> Vec<DbValue> {
        vec![
            self.path.as_str().into(),
            self.kind.as_str().into(),
            self.cos.as_str().into(),
            self.cart.as_deref().into(),
            self.checksum.into(),
            self.last_check.into(),
            self.fails.into(),
            self.probability.into(),
            self.reported.into(),
        ]
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// This entry's value for a category column, `None` when blank or not a
    /// category attribute.
    pub fn category(&self, name: &str) -> Option<String> {
        let value = match name {
            "cos" => self.cos.as_str(),
            "cart" => self.cart.as_deref().unwrap_or_default(),
            "type" => self.kind.as_str(),
            _ => return None,
        };
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Refresh identity and crawl state from the store row for this path.
    ///
    /// No stored row leaves the entry untouched.
    pub fn load(&mut self, conn: &DbConnection) -> Result<()> {
        let rows = self.rows_for_path(conn)?;
        match rows.as_slice() {
            [] => Ok(()),
            [row] => {
                let mut loaded = self.clone();
                for field in LOADED_FIELDS {
                    let value = row_value(row, field)?;
                    loaded.set_attr(field, value.clone())?;
                }
                *self = loaded;
                Ok(())
            }
            rows => Err(self.duplicate(rows.len())),
        }
    }

    /// The stored row for this entry's path, if there is exactly one.
    pub fn stored(&self, conn: &DbConnection) -> Result<Option<Checkable>> {
        let rows = self.rows_for_path(conn)?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Checkable::from_row(row).map(Some),
            rows => Err(self.duplicate(rows.len())),
        }
    }

    /// Write this entry to the store.
    ///
    /// Known entries (`rowid` set) overwrite their row. Unidentified entries
    /// are reconciled by path: inserted when new, rewritten when the stored
    /// row has a different type, otherwise the stored row stays authoritative
    /// unless `dirty` asks for the in-memory fields to win.
    pub fn persist(&mut self, conn: &DbConnection, dirty: bool) -> Result<()> {
        if let Some(rowid) = self.rowid {
            self.overwrite(conn, rowid)?;
            debug!(path = %self.path, rowid, "Updated catalog entry");
            return Ok(());
        }

        if self.last_check != 0 {
            return Err(AuditError::invalid_state(format!(
                "'{}' has no rowid but last_check = {}",
                self.path, self.last_check
            )));
        }

        let rows = self.rows_for_path(conn)?;
        match rows.as_slice() {
            [] => {
                conn.insert(TABLE, FIELDS, &[self.field_values()])?;
                let rowid = conn.last_insert_rowid();
                self.rowid = Some(rowid);
                debug!(path = %self.path, rowid, kind = %self.kind, "Inserted catalog entry");
            }
            [row] => {
                let stored = Checkable::from_row(row)?;
                let rowid = stored.rowid.ok_or_else(|| {
                    AuditError::invalid_state(format!("stored row for '{}' has no rowid", self.path))
                })?;

                if stored.kind != self.kind {
                    info!(
                        path = %self.path,
                        from = %stored.kind,
                        to = %self.kind,
                        "Catalog entry changed type"
                    );
                    self.overwrite(conn, rowid)?;
                    self.rowid = Some(rowid);
                } else if stored.cos != self.cos {
                    // Known inconsistency: a same-type match is otherwise left
                    // alone, but a reset entry (last_check == 0) with a new cos
                    // overwrites both columns.
                    conn.update(
                        TABLE,
                        &["cos", "last_check"],
                        &[vec![
                            self.cos.as_str().into(),
                            self.last_check.into(),
                            rowid.into(),
                        ]],
                        "rowid = ?",
                    )?;
                    debug!(path = %self.path, cos = %self.cos, "Reset catalog entry cos");
                } else if dirty {
                    self.overwrite(conn, rowid)?;
                    self.rowid = Some(rowid);
                }
            }
            rows => return Err(self.duplicate(rows.len())),
        }
        Ok(())
    }

    /// Decide checksum selection for this entry.
    ///
    /// `votes` is the sum of sampler votes for the entry's categories and
    /// `draw` a uniform sample from `[0, 1)`. Directories are never selected.
    pub fn wants_checksum(&self, votes: u32, draw: f64) -> bool {
        if !self.is_file() {
            return false;
        }
        let effective = (self.probability * (1.0 + f64::from(votes))).min(1.0);
        draw < effective
    }

    fn overwrite(&self, conn: &DbConnection, rowid: i64) -> Result<()> {
        let mut values = self.field_values();
        values.push(rowid.into());
        conn.update(TABLE, FIELDS, &[values], "rowid = ?")?;
        Ok(())
    }

    fn rows_for_path(&self, conn: &DbConnection) -> Result<Vec<DbRow>> {
        let select = Select::new(TABLE, SELECT_FIELDS)
            .filter("path = ?", vec![self.path.as_str().into()])
            .order_by("rowid");
        Ok(conn.select(&select)?)
    }

    fn duplicate(&self, count: usize) -> AuditError {
        warn!(path = %self.path, count, "Duplicate catalog rows");
        AuditError::DuplicateEntry {
            path: self.path.clone(),
            count,
        }
    }
}

/// Create the catalog and seed it with one unchecked directory per root.
///
/// Returns `false` without touching anything when the catalog already exists.
pub fn ex_nihilo(conn: &DbConnection, roots: &[String]) -> Result<bool> {
    seed_catalog(conn, roots, default_probability())
}

/// [`ex_nihilo`] with an explicit sampling weight for the root entries.
pub fn seed_catalog(conn: &DbConnection, roots: &[String], probability: f64) -> Result<bool> {
    if conn.table_exists(TABLE)? {
        debug!("Catalog already exists");
        return Ok(false);
    }

    let default_roots = ["/".to_string()];
    let roots = if roots.is_empty() { &default_roots[..] } else { roots };
    let rows: Vec<Vec<DbValue>> = roots
        .iter()
        .map(|root| {
            Checkable::directory(root.as_str())
                .with_probability(probability)
                .field_values()
        })
        .collect();

    conn.transaction(|tx| {
        tx.make_table(TABLE, COLUMNS)?;
        tx.execute_batch(&format!(
            "CREATE INDEX idx_{0}_path ON {0} (path); \
             CREATE INDEX idx_{0}_last_check ON {0} (last_check)",
            TABLE
        ))?;
        tx.insert(TABLE, FIELDS, &rows)
    })?;

    info!(roots = roots.len(), "Created catalog");
    Ok(true)
}

fn row_value<'r>(row: &'r DbRow, name: &str) -> Result<&'r DbValue> {
    row.value(name)
        .ok_or_else(|| AuditError::invalid_attribute(format!("row has no '{}' column", name)))
}

fn attr_value<T: FromDbValue>(name: &str, value: &DbValue) -> Result<T> {
    T::from_db_value(value)
        .map_err(|e| AuditError::invalid_attribute(format!("{}: {}", name, e)))
}

fn parse_kind(value: &DbValue) -> Result<EntryKind> {
    let raw: String = attr_value("type", value)?;
    EntryKind::parse(&raw)
        .ok_or_else(|| AuditError::invalid_attribute(format!("type: unknown entry type '{}'", raw)))
}
