//! Stratified checksum sampling.
//!
//! A [`Dimension`] tracks, for one catalog column, how the checked population
//! (`p_sum`) and the checksum sample (`s_sum`) are spread across categories.
//! Its [`vote`](Dimension::vote) nudges selection towards categories that are
//! under-represented in the sample.

use crate::checkable::{Checkable, TABLE};
use crate::config::default_sampsize;
use crate::error::{AuditError, Result};
use crawlaudit_db::{DbConnection, DbRow, DbValue, Select};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Count and share of one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stat {
    pub count: u64,
    pub pct: f64,
}

/// Population and sample distribution for one catalog column.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub name: String,
    pub sampsize: f64,
    /// Checked files (`last_check != 0`) per category.
    pub p_sum: BTreeMap<String, Stat>,
    /// Checksum-selected files per category; has every `p_sum` key after `load`.
    pub s_sum: BTreeMap<String, Stat>,
}

/// One line of [`Dimension::report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub category: String,
    pub population: Stat,
    pub sample: Stat,
    /// Sample size the category should reach: `sampsize * population`.
    pub target: f64,
}

impl Dimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_sampsize(name, default_sampsize())
    }

    pub fn with_sampsize(name: impl Into<String>, sampsize: f64) -> Self {
        Self {
            name: name.into(),
            sampsize,
            p_sum: BTreeMap::new(),
            s_sum: BTreeMap::new(),
        }
    }

    /// Recompute both distributions from the catalog.
    ///
    /// A catalog that cannot be read (not created yet, unknown column) leaves
    /// the current state in place.
    pub fn load(&mut self, conn: &DbConnection) {
        match self.tally(conn) {
            Ok((p_sum, mut s_sum)) => {
                for category in p_sum.keys() {
                    s_sum.entry(category.clone()).or_default();
                }
                self.p_sum = p_sum;
                self.s_sum = s_sum;
                debug!(
                    dimension = %self.name,
                    categories = self.p_sum.len(),
                    "Loaded dimension"
                );
            }
            Err(e) => {
                debug!(dimension = %self.name, error = %e, "Dimension load skipped");
            }
        }
    }

    fn tally(
        &self,
        conn: &DbConnection,
    ) -> Result<(BTreeMap<String, Stat>, BTreeMap<String, Stat>)> {
        let columns = conn.query_all(
            "SELECT name FROM pragma_table_info(?)",
            &[DbValue::from(TABLE)],
        )?;
        let known = columns
            .iter()
            .any(|row| row.get_by_name::<String>("name").map_or(false, |c| c == self.name));
        if !known {
            return Err(AuditError::invalid_attribute(format!(
                "'{}' is not a catalog column",
                self.name
            )));
        }

        let column = quote_column(&self.name);
        let population = format!(
            "type = 'f' AND last_check <> 0 AND {0} IS NOT NULL AND {0} <> ''",
            column
        );
        let sample = format!("{} AND checksum = 1", population);

        let p_rows = conn.select(
            &Select::new(TABLE, &[column.as_str(), "count(*)"])
                .filter(&population, Vec::new())
                .group_by(&column),
        )?;
        let s_rows = conn.select(
            &Select::new(TABLE, &[column.as_str(), "count(*)"])
                .filter(&sample, Vec::new())
                .group_by(&column),
        )?;
        Ok((distribution(&p_rows)?, distribution(&s_rows)?))
    }

    /// Count one more sampled entry in `category`.
    ///
    /// Blank categories are ignored, as they are everywhere else in the
    /// sampler: they never enter `p_sum` and never get a vote.
    pub fn addone(&mut self, category: &str) {
        if category.is_empty() {
            return;
        }
        self.s_sum.entry(category.to_string()).or_default().count += 1;
        recompute_pct(&mut self.s_sum);
    }

    /// 1 when `category` needs more samples, 0 otherwise.
    pub fn vote(&self, category: Option<&str>) -> u32 {
        let category = match category {
            Some(c) if !c.is_empty() => c,
            _ => return 0,
        };
        let Some(sample) = self.s_sum.get(category) else {
            return 1;
        };
        let population_pct = self.p_sum.get(category).map(|s| s.pct).unwrap_or(0.0);
        u32::from(sample.pct < population_pct)
    }

    /// Per-category comparison of population and sample, ordered by category.
    pub fn report(&self) -> Vec<ReportRow> {
        let mut categories: Vec<&String> = self.p_sum.keys().chain(self.s_sum.keys()).collect();
        categories.sort();
        categories.dedup();

        categories
            .into_iter()
            .map(|category| {
                let population = self.p_sum.get(category).copied().unwrap_or_default();
                ReportRow {
                    category: category.clone(),
                    population,
                    sample: self.s_sum.get(category).copied().unwrap_or_default(),
                    target: self.sampsize * population.count as f64,
                }
            })
            .collect()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>10} {:>7} {:>10} {:>7} {:>10}",
            self.name, "population", "%", "sample", "%", "target"
        )?;
        for row in self.report() {
            writeln!(
                f,
                "{:<12} {:>10} {:>7.2} {:>10} {:>7.2} {:>10.1}",
                row.category,
                row.population.count,
                row.population.pct,
                row.sample.count,
                row.sample.pct,
                row.target
            )?;
        }
        Ok(())
    }
}

fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn distribution(rows: &[DbRow]) -> Result<BTreeMap<String, Stat>> {
    let mut stats = BTreeMap::new();
    for row in rows {
        let Some(category) = row.get_raw(0).and_then(category_key) else {
            continue;
        };
        let count: i64 = row.get(1)?;
        stats.entry(category).or_insert_with(Stat::default).count += count.max(0) as u64;
    }
    recompute_pct(&mut stats);
    Ok(stats)
}

// Category columns are compared as text whatever their storage class.
fn category_key(value: &DbValue) -> Option<String> {
    let key = match value {
        DbValue::Text(s) => s.clone(),
        DbValue::Integer(i) => i.to_string(),
        DbValue::Real(r) => r.to_string(),
        DbValue::Boolean(b) => i64::from(*b).to_string(),
        DbValue::Null | DbValue::Blob(_) => return None,
    };
    (!key.is_empty()).then_some(key)
}

fn recompute_pct(stats: &mut BTreeMap<String, Stat>) {
    let total: u64 = stats.values().map(|s| s.count).sum();
    for stat in stats.values_mut() {
        stat.pct = if total == 0 {
            0.0
        } else {
            100.0 * stat.count as f64 / total as f64
        };
    }
}

/// Named dimensions for one catalog session.
///
/// Dimensions are created and loaded on first use; [`reset`](Self::reset)
/// drops them all so the next access reloads from the store.
#[derive(Debug)]
pub struct DimensionRegistry {
    sampsize: f64,
    dims: HashMap<String, Dimension>,
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::new(default_sampsize())
    }
}

impl DimensionRegistry {
    pub fn new(sampsize: f64) -> Self {
        Self {
            sampsize,
            dims: HashMap::new(),
        }
    }

    pub fn get_dim(&mut self, conn: &DbConnection, name: &str) -> &mut Dimension {
        let sampsize = self.sampsize;
        self.dims.entry(name.to_string()).or_insert_with(|| {
            let mut dim = Dimension::with_sampsize(name, sampsize);
            dim.load(conn);
            dim
        })
    }

    pub fn reset(&mut self) {
        self.dims.clear();
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Sum of the votes of every named dimension for `entry`.
    pub fn votes(&mut self, conn: &DbConnection, names: &[String], entry: &Checkable) -> u32 {
        names
            .iter()
            .map(|name| {
                let category = entry.category(name);
                self.get_dim(conn, name).vote(category.as_deref())
            })
            .sum()
    }

    /// Count `entry` as sampled in every named dimension.
    pub fn record_sample(&mut self, conn: &DbConnection, names: &[String], entry: &Checkable) {
        for name in names {
            if let Some(category) = entry.category(name) {
                self.get_dim(conn, name).addone(&category);
            }
        }
    }

    /// Decide checksum selection for `entry` and count it when selected.
    ///
    /// Later entries in the same session see the updated sample. Returns the
    /// votes the entry received.
    pub fn select_for_checksum(
        &mut self,
        conn: &DbConnection,
        names: &[String],
        entry: &mut Checkable,
        draw: f64,
    ) -> u32 {
        let votes = self.votes(conn, names, entry);
        entry.checksum = entry.wants_checksum(votes, draw);
        if entry.checksum {
            self.record_sample(conn, names, entry);
        }
        votes
    }
}
