//! Policy storage adapters.
//!
//! | driver                    | connect string                     |
//! |---------------------------|------------------------------------|
//! | `memory`                  | ignored                            |
//! | `file`                    | path of a CSV policy file          |
//! | `sqlite` / `sqlite3`      | file path, `sqlite:` URL or `file::memory:` |
//! | `postgres` / `postgresql` | `postgres://` URL                  |
//!
//! SQL adapters keep rules in `<prefix>_policy_rules` (or `policy_rules`
//! without a prefix) with columns `ptype, v0..v5`.

pub mod file;
pub mod memory;
pub mod sql;

pub use file::FileAdapter;
pub use memory::MemoryAdapter;
pub use sql::{PostgresAdapter, SqliteAdapter};

use thiserror::Error;

/// Why an adapter could not be opened.
#[derive(Debug, Error)]
pub enum AdapterBuildError {
    #[error("invalid table prefix '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidPrefix(String),

    #[error("invalid connect string: {0}")]
    ConnectString(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("could not prepare policy table: {0}")]
    Schema(String),
}

/// Policy table name for a prefix.
pub fn table_name(prefix: &str) -> Result<String, AdapterBuildError> {
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AdapterBuildError::InvalidPrefix(prefix.to_string()));
    }
    Ok(if prefix.is_empty() {
        "policy_rules".to_string()
    } else {
        format!("{prefix}_policy_rules")
    })
}
