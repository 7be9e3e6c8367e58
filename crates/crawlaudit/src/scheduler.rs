//! Work list assembly for one crawl pass.
//!
//! A batch is built from, in order:
//!
//! 1. priority entries read from pending files matched by `priority_glob`
//! 2. forced rechecks: checked entries older than `recheck_age`, oldest first,
//!    capped at `recheck_fraction * batch_size`
//! 3. never-checked entries, by path
//! 4. the oldest remaining checked entries
//!
//! Steps 2-4 share `batch_size`; priority entries come on top of it. Priority
//! files are moved out of the pending location only once the whole batch has
//! been assembled.

use crate::checkable::{Checkable, SELECT_FIELDS, TABLE};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crawlaudit_db::{DbConnection, Select};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Next batch of entries to verify, aged against the current time.
pub fn get_list(
    conn: &DbConnection,
    config: &AuditConfig,
    batch_size: Option<usize>,
    extra_roots: &[String],
) -> Result<Vec<Checkable>> {
    get_list_at(
        conn,
        config,
        chrono::Utc::now().timestamp(),
        batch_size,
        extra_roots,
    )
}

/// [`get_list`] with an explicit `now` (epoch seconds).
///
/// `batch_size = None` returns every eligible entry.
pub fn get_list_at(
    conn: &DbConnection,
    config: &AuditConfig,
    now: i64,
    batch_size: Option<usize>,
    extra_roots: &[String],
) -> Result<Vec<Checkable>> {
    if !conn.table_exists(TABLE)? {
        return Err(AuditError::StoreUnavailable(format!(
            "catalog table '{}' does not exist",
            TABLE
        )));
    }

    bootstrap_roots(conn, config, extra_roots)?;

    let PriorityFiles {
        entries: mut batch,
        consumed,
    } = read_priority(config)?;
    let priority = batch.len();

    let cutoff = now.saturating_sub(config.recheck_age_secs()?);
    let recheck_limit =
        batch_size.map(|size| (config.recheck_fraction * size as f64).floor() as usize);
    let rechecks = select_entries(
        conn,
        Select::new(TABLE, SELECT_FIELDS)
            .filter("last_check <> 0 AND last_check < ?", vec![cutoff.into()])
            .order_by("last_check, rowid"),
        recheck_limit,
    )?;

    let mut remaining = batch_size.map(|size| size.saturating_sub(rechecks.len()));
    let unchecked = select_entries(
        conn,
        Select::new(TABLE, SELECT_FIELDS)
            .filter("last_check = 0", Vec::new())
            .order_by("path, rowid"),
        remaining,
    )?;
    remaining = remaining.map(|r| r.saturating_sub(unchecked.len()));

    // Rowids are store-assigned integers, so they are inlined rather than bound.
    let mut oldest_filter = "last_check <> 0".to_string();
    if !rechecks.is_empty() {
        let ids: Vec<String> = rechecks
            .iter()
            .filter_map(|e| e.rowid)
            .map(|id| id.to_string())
            .collect();
        oldest_filter.push_str(&format!(" AND rowid NOT IN ({})", ids.join(", ")));
    }
    let oldest = select_entries(
        conn,
        Select::new(TABLE, SELECT_FIELDS)
            .filter(&oldest_filter, Vec::new())
            .order_by("last_check, rowid"),
        remaining,
    )?;

    info!(
        priority,
        rechecks = rechecks.len(),
        unchecked = unchecked.len(),
        oldest = oldest.len(),
        "Assembled crawl batch"
    );

    batch.extend(rechecks);
    batch.extend(unchecked);
    batch.extend(oldest);

    complete_priority(config, &consumed);
    Ok(batch)
}

fn select_entries(
    conn: &DbConnection,
    select: Select,
    limit: Option<usize>,
) -> Result<Vec<Checkable>> {
    let select = match limit {
        Some(0) => return Ok(Vec::new()),
        Some(n) => select.limit(n),
        None => select,
    };
    conn.select(&select)?
        .iter()
        .map(Checkable::from_row)
        .collect()
}

/// Insert unknown roots as unchecked directories.
///
/// `extra_roots` wins; otherwise the configured data roots are seeded into an
/// empty catalog.
fn bootstrap_roots(conn: &DbConnection, config: &AuditConfig, extra_roots: &[String]) -> Result<()> {
    let roots = if !extra_roots.is_empty() {
        extra_roots
    } else {
        let count: i64 = conn.query_scalar(&format!("SELECT COUNT(*) FROM {}", TABLE), &[])?;
        if count > 0 {
            return Ok(());
        }
        &config.data_roots[..]
    };

    for root in roots {
        let mut entry =
            Checkable::directory(root.as_str()).with_probability(config.default_probability);
        entry.load(conn)?;
        if entry.rowid.is_none() {
            entry.persist(conn, false)?;
            info!(root = %root, "Added data root");
        }
    }
    Ok(())
}

struct PriorityFiles {
    entries: Vec<Checkable>,
    /// Files whose entries are in `entries`, in read order.
    consumed: Vec<PathBuf>,
}

/// Read every pending priority file.
///
/// A file that cannot be read is skipped with a warning and stays pending.
/// Nothing is moved here; see [`complete_priority`].
fn read_priority(config: &AuditConfig) -> Result<PriorityFiles> {
    let mut files = PriorityFiles {
        entries: Vec::new(),
        consumed: Vec::new(),
    };
    let Some(pattern) = config.priority_glob.as_deref() else {
        return Ok(files);
    };

    let mut pending: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| AuditError::Pattern(format!("{}: {}", pattern, e)))?
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Unreadable priority path");
                None
            }
        })
        .collect();
    pending.sort();

    for path in pending {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable priority file");
                continue;
            }
        };
        let before = files.entries.len();
        files.entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Checkable::file(line).with_probability(config.default_probability)),
        );
        debug!(
            file = %path.display(),
            entries = files.entries.len() - before,
            "Read priority file"
        );
        files.consumed.push(path);
    }
    Ok(files)
}

/// Move consumed priority files to the completed location.
///
/// A failed move leaves the file pending, so its entries come back in a
/// later batch.
fn complete_priority(config: &AuditConfig, consumed: &[PathBuf]) {
    for path in consumed {
        let moved = completed_path(config, path)
            .and_then(|dest| fs::rename(path, &dest).map(|()| dest).map_err(AuditError::from));
        match moved {
            Ok(dest) => debug!(
                file = %path.display(),
                moved_to = %dest.display(),
                "Consumed priority file"
            ),
            Err(e) => warn!(
                file = %path.display(),
                error = %e,
                "Priority file left pending"
            ),
        }
    }
}

fn completed_path(config: &AuditConfig, pending: &Path) -> Result<PathBuf> {
    let dir = match &config.completed_dir {
        Some(dir) => PathBuf::from(dir),
        None => pending
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("completed"),
    };
    fs::create_dir_all(&dir)?;
    let name = pending.file_name().ok_or_else(|| {
        AuditError::Pattern(format!("priority path has no file name: {}", pending.display()))
    })?;
    Ok(dir.join(name))
}
