//! Crawlaudit core
//!
//! Decides what an archive integrity crawl should verify next and keeps the
//! catalog of verified paths consistent:
//!
//! - [`fdparse`]: turns directory-listing lines into entry descriptors
//! - [`checkable`]: catalog entries and their load/persist state machine
//! - [`scheduler`]: assembles the next batch of entries to verify
//! - [`dimension`]: stratified checksum sampling by category
//! - [`ingest`]: feeds listings into the catalog

pub mod checkable;
pub mod config;
pub mod dimension;
pub mod error;
pub mod fdparse;
pub mod ingest;
pub mod scheduler;

pub use checkable::{ex_nihilo, seed_catalog, Checkable, EntryKind};
pub use config::AuditConfig;
pub use dimension::{Dimension, DimensionRegistry, ReportRow, Stat};
pub use error::{AuditError, Result};
pub use fdparse::EntryDescriptor;
pub use ingest::{ingest_listing, IngestStats};
pub use scheduler::{get_list, get_list_at};
