//! Listing ingestion: parse listing lines and reconcile them into the catalog.

use crate::checkable::Checkable;
use crate::error::{AuditError, Result};
use crate::fdparse;
use crawlaudit_db::DbConnection;
use serde::Serialize;
use std::io::BufRead;
use tracing::{info, warn};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Lines recognised as entries.
    pub parsed: usize,
    /// Lines no grammar accepted.
    pub skipped: usize,
    /// Entries persisted.
    pub stored: usize,
    /// Entries the catalog refused (duplicates, inconsistent state).
    pub rejected: usize,
}

/// Feed every line of `reader` through the listing parser and persist the
/// resulting entries.
///
/// Relative names from long listings are joined under `parent`. New entries
/// get `probability` as their sampling weight. Per-entry catalog conflicts are
/// counted and logged; store failures abort the run.
pub fn ingest_listing<R: BufRead>(
    conn: &DbConnection,
    reader: R,
    parent: Option<&str>,
    probability: f64,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    for line in reader.lines() {
        let line = line?;
        let Some(desc) = fdparse::parse(&line) else {
            stats.skipped += 1;
            continue;
        };
        stats.parsed += 1;

        let mut entry = Checkable::from_descriptor(desc).with_probability(probability);
        if let Some(parent) = parent {
            entry.path = join_path(parent, &entry.path);
        }

        match reconcile(conn, &mut entry) {
            Ok(()) => stats.stored += 1,
            Err(e @ (AuditError::DuplicateEntry { .. } | AuditError::InvalidState(_))) => {
                warn!(path = %entry.path, error = %e, "Rejected listing entry");
                stats.rejected += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        parsed = stats.parsed,
        skipped = stats.skipped,
        stored = stats.stored,
        rejected = stats.rejected,
        "Ingested listing"
    );
    Ok(stats)
}

// Long listings carry no cos. A blank cos would read as a category change
// and reset the stored entry, so the stored cos is kept instead.
fn reconcile(conn: &DbConnection, entry: &mut Checkable) -> Result<()> {
    if entry.cos.is_empty() {
        if let Some(stored) = entry.stored(conn)? {
            if stored.kind == entry.kind {
                entry.cos = stored.cos;
            }
        }
    }
    entry.persist(conn, false)
}

fn join_path(parent: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    format!("{}/{}", parent.trim_end_matches('/'), name)
}
