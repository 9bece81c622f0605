//! Storage adapters: one implementation of [`Storage`] per SQL dialect,
//! plus connection setup with retries.

pub mod mysql;
#[cfg(feature = "oracle")]
pub mod oracle;
pub mod postgres;
pub mod sqlite;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ConnectionTarget;
use crate::error::{BloomError, Result};
use crate::history::{MigrationRecord, MigrationType, NewRecord, BASELINE_DESCRIPTION};
use crate::version::version_to_int;

/// Version table columns in storage order.
pub(crate) const COLUMNS: [&str; 10] = [
    "installed_rank",
    "version",
    "description",
    "type",
    "script",
    "checksum",
    "installed_by",
    "installed_on",
    "execution_time",
    "success",
];

/// Columns written on insert; `installed_on` is filled by the database.
pub(crate) const INSERT_COLUMNS: [&str; 9] = [
    "installed_rank",
    "version",
    "description",
    "type",
    "script",
    "checksum",
    "installed_by",
    "execution_time",
    "success",
];

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
    Oracle,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Oracle => "oracle",
        };
        f.write_str(name)
    }
}

/// Kind of a schema object reported by [`Storage::list_database_objects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Index,
    Sequence,
    Procedure,
    Function,
}

impl ObjectKind {
    /// Map a catalog type name (`BASE TABLE`, `view`, `PROCEDURE`, ...) to a kind.
    pub fn from_catalog(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "table" | "base table" => Some(ObjectKind::Table),
            "view" | "materialized view" => Some(ObjectKind::View),
            "index" => Some(ObjectKind::Index),
            "sequence" => Some(ObjectKind::Sequence),
            "procedure" => Some(ObjectKind::Procedure),
            "function" => Some(ObjectKind::Function),
            _ => None,
        }
    }

    /// Order in which destroy drops objects: dependents first.
    pub(crate) fn drop_order(&self) -> u8 {
        match self {
            ObjectKind::View => 0,
            ObjectKind::Index => 1,
            ObjectKind::Table => 2,
            ObjectKind::Sequence => 3,
            ObjectKind::Procedure => 4,
            ObjectKind::Function => 5,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Function => "function",
        };
        f.write_str(name)
    }
}

/// A named schema object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DatabaseObject {
    pub kind: ObjectKind,
    pub name: String,
}

impl fmt::Display for DatabaseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Objects created and dropped between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectDelta {
    pub created: Vec<DatabaseObject>,
    pub dropped: Vec<DatabaseObject>,
}

impl ObjectDelta {
    pub fn between(before: &[DatabaseObject], after: &[DatabaseObject]) -> Self {
        let before: BTreeSet<&DatabaseObject> = before.iter().collect();
        let after: BTreeSet<&DatabaseObject> = after.iter().collect();
        Self {
            created: after.difference(&before).map(|o| (*o).clone()).collect(),
            dropped: before.difference(&after).map(|o| (*o).clone()).collect(),
        }
    }
}

/// Dialect-agnostic access to the target database.
///
/// Identifier quoting and placeholder style stay inside each implementation.
#[async_trait]
pub trait Storage: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Minimal round-trip to verify the connection.
    async fn ping(&self) -> Result<()>;

    /// Release the connection. Later calls fail.
    async fn close(&self) -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn create_version_table(&self, table: &str) -> Result<()>;

    /// Rows ordered by `installed_rank`.
    async fn list_records(&self, table: &str) -> Result<Vec<MigrationRecord>>;

    async fn insert_record(&self, table: &str, record: &NewRecord) -> Result<()>;

    /// Realign the version, description and checksum of one row.
    async fn update_record(
        &self,
        table: &str,
        rank: i64,
        version: Option<&str>,
        description: &str,
        checksum: Option<i32>,
    ) -> Result<()>;

    /// Overwrite every column of the row currently at `rank`.
    async fn update_record_full(&self, table: &str, rank: i64, record: &NewRecord) -> Result<()>;

    /// `DELETE ... WHERE success != 1`; returns the number of rows removed.
    async fn delete_failed(&self, table: &str) -> Result<u64>;

    /// Run a migration body, split into statements where the dialect needs it.
    async fn execute_migration(&self, body: &str) -> Result<()>;

    async fn list_database_objects(&self) -> Result<Vec<DatabaseObject>>;

    async fn drop_object(&self, object: &DatabaseObject) -> Result<()>;

    /// Insert the baseline row at rank `version_to_int(version)`.
    async fn insert_baseline(&self, table: &str, version: &str, installed_by: &str) -> Result<()> {
        let record = NewRecord {
            installed_rank: version_to_int(version),
            version: Some(version.to_string()),
            description: BASELINE_DESCRIPTION.to_string(),
            migration_type: MigrationType::Baseline,
            script: BASELINE_DESCRIPTION.to_string(),
            checksum: None,
            installed_by: installed_by.to_string(),
            execution_time: 0,
            success: true,
        };
        self.insert_record(table, &record).await
    }
}

/// Quote a SQL identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Validate that a SQL identifier contains only safe characters.
///
/// Returns an error for names with characters outside `[a-zA-Z0-9_]`.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BloomError::ConfigError(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BloomError::ConfigError(format!(
            "Identifier '{}' contains invalid characters. Only [a-zA-Z0-9_] are allowed.",
            name
        )));
    }
    Ok(())
}

/// Comma-separated column list, each quoted by `quote`.
pub(crate) fn column_list(columns: &[&str], quote: impl Fn(&str) -> String) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split a body into statements on `;`.
///
/// Not aware of string literals or comments: a `;` inside either splits too.
pub fn split_statements(body: &str) -> Vec<&str> {
    body.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Connection settings shared by all dialects.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Extra attempts after the first failure (max 20).
    pub retries: u32,
    /// Per-attempt timeout; 0 disables it.
    pub timeout_secs: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout_secs: 30,
        }
    }
}

/// Check if an error is a permanent authentication failure that should not be retried.
fn is_permanent_error(e: &BloomError) -> bool {
    match e {
        BloomError::DatabaseError(pg) => pg
            .as_db_error()
            // 28P01 = invalid_password, 28000 = invalid_authorization_specification
            .map(|db| matches!(db.code().code(), "28P01" | "28000"))
            .unwrap_or(false),
        BloomError::MysqlError(sqlx::Error::Database(db)) => {
            db.code().as_deref() == Some("28000")
        }
        BloomError::SqliteError(_) | BloomError::ConfigError(_) | BloomError::DialectNotEnabled(_) => {
            true
        }
        _ => false,
    }
}

async fn connect_once(target: &ConnectionTarget) -> Result<Box<dyn Storage>> {
    let storage: Box<dyn Storage> = match target.dialect {
        Dialect::Sqlite => Box::new(sqlite::SqliteStorage::open(&target.dsn)?),
        Dialect::Postgres => Box::new(postgres::PostgresStorage::connect(&target.dsn).await?),
        Dialect::Mysql => Box::new(mysql::MysqlStorage::connect(&target.dsn).await?),
        #[cfg(feature = "oracle")]
        Dialect::Oracle => Box::new(oracle::OracleStorage::connect(&target.dsn)?),
        #[cfg(not(feature = "oracle"))]
        Dialect::Oracle => return Err(BloomError::DialectNotEnabled("oracle".to_string())),
    };
    storage.ping().await?;
    Ok(storage)
}

async fn connect_with_timeout(
    target: &ConnectionTarget,
    timeout_secs: u32,
) -> Result<Box<dyn Storage>> {
    if timeout_secs == 0 {
        return connect_once(target).await;
    }
    match tokio::time::timeout(
        std::time::Duration::from_secs(timeout_secs as u64),
        connect_once(target),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(BloomError::ConnectionTimeout { secs: timeout_secs }),
    }
}

/// Connect to the target, retrying with exponential backoff and jitter.
///
/// Each retry waits `min(2^attempt, 30)s + rand(0..1000ms)`. Permanent errors
/// (bad credentials, unopenable SQLite file) are not retried.
pub async fn connect(target: &ConnectionTarget, options: ConnectOptions) -> Result<Box<dyn Storage>> {
    let retries = options.retries.min(20);
    let mut last_err = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            let base_delay = std::cmp::min(1u64 << attempt, 30);
            let jitter_ms = fastrand::u64(0..1000);
            let delay = std::time::Duration::from_secs(base_delay)
                + std::time::Duration::from_millis(jitter_ms);
            log::info!(
                "Connection attempt failed, retrying; attempt={}, max_attempts={}, delay_ms={}",
                attempt + 1,
                retries + 1,
                delay.as_millis() as u64
            );
            tokio::time::sleep(delay).await;
        }

        match connect_with_timeout(target, options.timeout_secs).await {
            Ok(storage) => {
                log::debug!("Connected; dialect={}", target.dialect);
                return Ok(storage);
            }
            Err(e) => {
                if is_permanent_error(&e) {
                    log::error!("Permanent connection error, not retrying: {}", e);
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        BloomError::ConfigError("No connection attempt was made".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("BLOOMDB_VERSION").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("Table123").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("my-table").is_err());
        assert!(validate_identifier("my table").is_err());
        assert!(validate_identifier("table;drop").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("my\"table"), "\"my\"\"table\"");
    }

    #[test]
    fn test_split_statements() {
        let body = "CREATE TABLE a (id INT);\n\nINSERT INTO a VALUES (1);  \n;";
        assert_eq!(
            split_statements(body),
            vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[test]
    fn test_split_statements_is_naive_about_literals() {
        let body = "INSERT INTO t VALUES ('a;b');";
        assert_eq!(split_statements(body).len(), 2);
    }

    #[test]
    fn test_split_statements_empty() {
        assert!(split_statements("  \n ;; ").is_empty());
    }

    #[test]
    fn test_object_delta() {
        let table = |n: &str| DatabaseObject {
            kind: ObjectKind::Table,
            name: n.to_string(),
        };
        let before = vec![table("a"), table("b")];
        let after = vec![table("b"), table("c")];
        let delta = ObjectDelta::between(&before, &after);
        assert_eq!(delta.created, vec![table("c")]);
        assert_eq!(delta.dropped, vec![table("a")]);
    }

    #[test]
    fn test_object_kind_from_catalog() {
        assert_eq!(ObjectKind::from_catalog("BASE TABLE"), Some(ObjectKind::Table));
        assert_eq!(ObjectKind::from_catalog("VIEW"), Some(ObjectKind::View));
        assert_eq!(ObjectKind::from_catalog("PROCEDURE"), Some(ObjectKind::Procedure));
        assert_eq!(ObjectKind::from_catalog("trigger"), None);
    }

    #[test]
    fn test_column_list() {
        assert_eq!(
            column_list(&["a", "type"], quote_ident),
            "\"a\", \"type\""
        );
    }

    #[test]
    fn test_permanent_errors() {
        assert!(is_permanent_error(&BloomError::ConfigError("x".to_string())));
        assert!(!is_permanent_error(&BloomError::ConnectionTimeout { secs: 1 }));
    }
}
