//! Generic table operations for the catalog.
//!
//! Callers address tables by name and pass field lists plus an optional
//! `WHERE` fragment with `?` placeholders. Field entries are emitted verbatim
//! so aggregates such as `count(*)` and the implicit `rowid` can be selected.

use crate::backend::{quote_ident, quote_ident_path, DbConnection, DbRow, DbTransaction, DbValue};
use crate::error::{BackendError, Result};

/// A `SELECT` against a single table.
#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    fields: Vec<String>,
    filter: Option<String>,
    params: Vec<DbValue>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<usize>,
}

impl Select {
    pub fn new(table: &str, fields: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            filter: None,
            params: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
        }
    }

    /// Restrict rows with a `WHERE` fragment; `params` bind its placeholders.
    pub fn filter(mut self, clause: &str, params: Vec<DbValue>) -> Self {
        self.filter = Some(clause.to_string());
        self.params = params;
        self
    }

    pub fn group_by(mut self, clause: &str) -> Self {
        self.group_by = Some(clause.to_string());
        self
    }

    pub fn order_by(mut self, clause: &str) -> Self {
        self.order_by = Some(clause.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> Result<String> {
        if self.fields.is_empty() {
            return Err(BackendError::invalid_input("select requires at least one field"));
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            self.fields.join(", "),
            quote_ident_path(&self.table)
        );
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group_by);
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(sql)
    }
}

impl DbConnection {
    /// Whether a table with this name exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[DbValue::from(table)],
        )?;
        Ok(count > 0)
    }

    /// Create a table from column definitions such as `"path TEXT NOT NULL"`.
    pub fn make_table(&self, table: &str, columns: &[&str]) -> Result<()> {
        self.execute_batch(&create_table_sql(table, columns)?)
    }

    /// Drop a table if it exists.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident_path(table)))
    }

    /// Run a [`Select`] and return every row.
    pub fn select(&self, select: &Select) -> Result<Vec<DbRow>> {
        let sql = select.to_sql()?;
        self.query_all(&sql, &select.params)
    }

    /// Insert rows; each row carries one value per field.
    pub fn insert(&self, table: &str, fields: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        self.bulk_insert_rows(table, fields, rows)
    }

    /// Update rows matching `filter`.
    ///
    /// Each entry in `data` holds the new values for `fields` followed by the
    /// parameters for the placeholders in `filter`; one `UPDATE` runs per entry.
    pub fn update(
        &self,
        table: &str,
        fields: &[&str],
        data: &[Vec<DbValue>],
        filter: &str,
    ) -> Result<u64> {
        if fields.is_empty() {
            return Err(BackendError::invalid_input("update requires at least one field"));
        }
        let filter_params = filter.matches('?').count();
        let assignments = fields
            .iter()
            .map(|f| format!("{} = ?", quote_ident(f)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident_path(table),
            assignments,
            filter
        );

        let mut total = 0;
        for (index, values) in data.iter().enumerate() {
            if values.len() != fields.len() + filter_params {
                return Err(BackendError::InvalidInput(format!(
                    "Update row {} has {} values, expected {}",
                    index,
                    values.len(),
                    fields.len() + filter_params
                )));
            }
            total += self.execute(&sql, values)?;
        }
        Ok(total)
    }
}

impl DbTransaction<'_> {
    /// [`DbConnection::make_table`] inside the open transaction.
    pub fn make_table(&mut self, table: &str, columns: &[&str]) -> Result<()> {
        self.execute_batch(&create_table_sql(table, columns)?)
    }

    /// [`DbConnection::insert`] inside the open transaction.
    pub fn insert(&mut self, table: &str, fields: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        self.bulk_insert_rows(table, fields, rows)
    }
}

fn create_table_sql(table: &str, columns: &[&str]) -> Result<String> {
    if columns.is_empty() {
        return Err(BackendError::invalid_input(format!(
            "table '{}' needs at least one column",
            table
        )));
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident_path(table),
        columns.join(", ")
    ))
}
