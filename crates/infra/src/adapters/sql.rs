//! SQL-backed policy storage (SQLite and Postgres via sqlx).
//!
//! One row per rule: `ptype` plus up to six values `v0..v5`, unused columns
//! stored as empty strings. Rows are read back in insertion order (`id`).
//!
//! `save_policy` replaces the whole table inside one transaction, so a failed
//! save leaves the previous contents in place.
//!
//! ## Error Mapping
//!
//! | sqlx error            | AdapterError |
//! |-----------------------|--------------|
//! | `Database`            | `Database`   |
//! | `PoolClosed` / `PoolTimedOut` / `Io` | `Io` |
//! | anything else         | `Database`   |

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::instrument;

use gatekeeper_engine::{Adapter, AdapterError, PolicyRule};

use super::{AdapterBuildError, table_name};

/// Number of value columns (`v0..v5`).
pub const VALUE_COLUMNS: usize = 6;

/// SQL text for one policy table in one dialect.
#[derive(Debug, Clone)]
struct Statements {
    create: String,
    select: String,
    delete: String,
    insert: String,
}

#[derive(Debug, Copy, Clone)]
enum Dialect {
    Sqlite,
    Postgres,
}

impl Statements {
    fn new(table: &str, dialect: Dialect) -> Self {
        let id_column = match dialect {
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        };
        let value_columns: Vec<String> = (0..VALUE_COLUMNS)
            .map(|i| format!("v{i} TEXT NOT NULL DEFAULT ''"))
            .collect();
        let placeholders: Vec<String> = (1..=VALUE_COLUMNS + 1)
            .map(|i| match dialect {
                Dialect::Sqlite => format!("?{i}"),
                Dialect::Postgres => format!("${i}"),
            })
            .collect();

        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} ({id_column}, ptype TEXT NOT NULL, {})",
                value_columns.join(", ")
            ),
            select: format!("SELECT ptype, v0, v1, v2, v3, v4, v5 FROM {table} ORDER BY id ASC"),
            delete: format!("DELETE FROM {table}"),
            insert: format!(
                "INSERT INTO {table} (ptype, v0, v1, v2, v3, v4, v5) VALUES ({})",
                placeholders.join(", ")
            ),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AdapterError {
    match err {
        sqlx::Error::Database(db_err) => {
            AdapterError::Database(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => AdapterError::Io(format!("{operation}: connection pool closed")),
        sqlx::Error::PoolTimedOut => {
            AdapterError::Io(format!("{operation}: timed out waiting for a connection"))
        }
        sqlx::Error::Io(e) => AdapterError::Io(format!("{operation}: {e}")),
        other => AdapterError::Database(format!("{operation}: {other}")),
    }
}

/// Pad a rule's values to the fixed column count.
fn columns(rule: &PolicyRule) -> Result<Vec<&str>, AdapterError> {
    if rule.values.len() > VALUE_COLUMNS {
        return Err(AdapterError::Format(format!(
            "'{}' rule has {} values; at most {VALUE_COLUMNS} can be stored",
            rule.ptype,
            rule.values.len()
        )));
    }
    let mut cols: Vec<&str> = rule.values.iter().map(String::as_str).collect();
    cols.resize(VALUE_COLUMNS, "");
    Ok(cols)
}

/// Shared `Adapter` implementation; the pool types differ per backend.
macro_rules! sql_adapter {
    ($adapter:ident, $driver:literal) => {
        impl $adapter {
            pub fn table(&self) -> &str {
                &self.table
            }

            async fn ensure_table(&self) -> Result<(), AdapterBuildError> {
                sqlx::query(&self.statements.create)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| AdapterBuildError::Schema(e.to_string()))?;
                Ok(())
            }
        }

        #[async_trait]
        impl Adapter for $adapter {
            fn driver(&self) -> &str {
                $driver
            }

            #[instrument(skip(self), fields(table = %self.table), err)]
            async fn load_policy(&self) -> Result<Vec<PolicyRule>, AdapterError> {
                let rows = sqlx::query(&self.statements.select)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("load_policy", e))?;

                let mut rules = Vec::with_capacity(rows.len());
                for row in rows {
                    let ptype: String = row
                        .try_get("ptype")
                        .map_err(|e| map_sqlx_error("load_policy", e))?;
                    let mut values = Vec::with_capacity(VALUE_COLUMNS);
                    for i in 0..VALUE_COLUMNS {
                        let value: String = row
                            .try_get(i + 1)
                            .map_err(|e| map_sqlx_error("load_policy", e))?;
                        values.push(value);
                    }
                    rules.push(PolicyRule { ptype, values });
                }
                Ok(rules)
            }

            #[instrument(skip(self, rules), fields(table = %self.table, rules = rules.len()), err)]
            async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), AdapterError> {
                let mut rows = Vec::with_capacity(rules.len());
                for rule in rules {
                    rows.push((rule.ptype.as_str(), columns(rule)?));
                }

                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| map_sqlx_error("begin_transaction", e))?;

                sqlx::query(&self.statements.delete)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("clear_policy", e))?;

                for (ptype, cols) in &rows {
                    let mut query = sqlx::query(&self.statements.insert).bind(*ptype);
                    for col in cols {
                        query = query.bind(*col);
                    }
                    query
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("insert_rule", e))?;
                }

                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(())
            }
        }
    };
}

/// SQLite policy table.
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: SqlitePool,
    table: String,
    statements: Statements,
}

impl SqliteAdapter {
    /// Open (creating if needed) the database and policy table.
    ///
    /// `:memory:` and `mode=memory` connect strings get a private in-memory
    /// database held open by a single pooled connection.
    #[instrument(skip(connect_string))]
    pub async fn connect(
        connect_string: &str,
        prefix: &str,
        max_connections: u32,
    ) -> Result<Self, AdapterBuildError> {
        let table = table_name(prefix)?;
        let in_memory = connect_string.contains(":memory:") || connect_string.contains("mode=memory");

        let connected = if in_memory {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| AdapterBuildError::ConnectString(e.to_string()))?;
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            let options = if connect_string.starts_with("sqlite:") {
                SqliteConnectOptions::from_str(connect_string)
                    .map_err(|e| AdapterBuildError::ConnectString(e.to_string()))?
            } else {
                SqliteConnectOptions::new().filename(connect_string)
            };
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options.create_if_missing(true))
                .await
        };
        let pool = connected.map_err(|e| AdapterBuildError::Connect(e.to_string()))?;

        let adapter = Self {
            pool,
            statements: Statements::new(&table, Dialect::Sqlite),
            table,
        };
        adapter.ensure_table().await?;
        tracing::debug!(table = %adapter.table, in_memory, "sqlite adapter ready");
        Ok(adapter)
    }
}

sql_adapter!(SqliteAdapter, "sqlite");

/// Postgres policy table.
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
    table: String,
    statements: Statements,
}

impl PostgresAdapter {
    #[instrument(skip(connect_string))]
    pub async fn connect(
        connect_string: &str,
        prefix: &str,
        max_connections: u32,
    ) -> Result<Self, AdapterBuildError> {
        let table = table_name(prefix)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(connect_string)
            .await
            .map_err(|e| AdapterBuildError::Connect(e.to_string()))?;

        let adapter = Self {
            pool,
            statements: Statements::new(&table, Dialect::Postgres),
            table,
        };
        adapter.ensure_table().await?;
        tracing::debug!(table = %adapter.table, "postgres adapter ready");
        Ok(adapter)
    }
}

sql_adapter!(PostgresAdapter, "postgres");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_use_dialect_placeholders() {
        let sqlite = Statements::new("policy_rules", Dialect::Sqlite);
        assert!(sqlite.insert.ends_with("VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"));
        assert!(sqlite.create.contains("AUTOINCREMENT"));

        let pg = Statements::new("acme_policy_rules", Dialect::Postgres);
        assert!(pg.insert.starts_with("INSERT INTO acme_policy_rules"));
        assert!(pg.insert.ends_with("VALUES ($1, $2, $3, $4, $5, $6, $7)"));
        assert!(pg.create.contains("BIGSERIAL"));
    }

    #[tokio::test]
    async fn sqlite_round_trip_preserves_order() {
        let adapter = SqliteAdapter::connect("file::memory:", "", 5).await.unwrap();
        let rules = vec![
            PolicyRule::new("p", ["bob", "data2", "write"]),
            PolicyRule::new("p", ["alice", "data1", "read"]),
            PolicyRule::new("g", ["alice", "admin"]),
        ];
        adapter.save_policy(&rules).await.unwrap();

        let loaded = adapter.load_policy().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].ptype, "p");
        assert_eq!(&loaded[0].values[..3], &["bob", "data2", "write"]);
        // Unused columns come back as empty strings.
        assert_eq!(&loaded[2].values[2..], &["", "", "", ""]);
    }

    #[tokio::test]
    async fn sqlite_save_replaces_contents() {
        let adapter = SqliteAdapter::connect(":memory:", "t1", 1).await.unwrap();
        assert_eq!(adapter.table(), "t1_policy_rules");

        adapter
            .save_policy(&[PolicyRule::new("p", ["alice", "data1", "read"])])
            .await
            .unwrap();
        adapter
            .save_policy(&[PolicyRule::new("p", ["bob", "data2", "write"])])
            .await
            .unwrap();

        let loaded = adapter.load_policy().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].values[0], "bob");
    }

    #[tokio::test]
    async fn sqlite_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.db");
        let adapter = SqliteAdapter::connect(path.to_str().unwrap(), "", 2).await.unwrap();
        adapter
            .save_policy(&[PolicyRule::new("p", ["alice", "data1", "read"])])
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn oversized_rules_are_rejected_before_writing() {
        let adapter = SqliteAdapter::connect(":memory:", "", 1).await.unwrap();
        adapter
            .save_policy(&[PolicyRule::new("p", ["alice", "data1", "read"])])
            .await
            .unwrap();

        let wide = PolicyRule::new("p", ["a", "b", "c", "d", "e", "f", "g"]);
        assert!(matches!(
            adapter.save_policy(&[wide]).await,
            Err(AdapterError::Format(_))
        ));
        assert_eq!(adapter.load_policy().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_prefix_fails_before_connecting() {
        let err = SqliteAdapter::connect(":memory:", "bad-prefix", 1).await.unwrap_err();
        assert!(matches!(err, AdapterBuildError::InvalidPrefix(_)));
    }
}
