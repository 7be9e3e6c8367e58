//! Catalog store for crawlaudit
//!
//! A thin synchronous layer over SQLite: a cloneable connection handle, a
//! small value model, and generic table operations (`table_exists`,
//! `make_table`, `drop_table`, `select`, `insert`, `update`).
//!
//! # Usage
//!
//! ```rust,ignore
//! use crawlaudit_db::{DbConnection, Select};
//!
//! let conn = DbConnection::open(Path::new("catalog.sqlite3"))?;
//! let rows = conn.select(&Select::new("checkables", &["rowid", "path"]).limit(10))?;
//! ```

mod backend;
mod error;
mod table;

pub use backend::{DbConnection, DbRow, DbTransaction, DbValue, FromDbValue};
pub use error::{BackendError, Result};
pub use table::Select;
