//! Error types for BloomDB operations.

use std::fmt;

use thiserror::Error;

use crate::commands::migrate::MigrateReport;

/// Extract the full error message from a tokio_postgres::Error,
/// including the underlying DbError details that Display hides.
pub fn format_db_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        let mut msg = db_err.message().to_string();
        if let Some(detail) = db_err.detail() {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = db_err.hint() {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        if let Some(position) = db_err.position() {
            msg.push_str(&format!("\n  Position: {:?}", position));
        }
        return msg;
    }
    // Fallback: walk the source chain
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(&format!(": {}", s));
        source = s.source();
    }
    if e.is_closed() {
        msg.push_str("\n  Note: The database connection was closed unexpectedly.");
    }
    msg
}

/// A single divergence between a recorded checksum and the file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDivergence {
    /// Canonical script identifier (`V2__b`, `R__views`).
    pub script: String,
    /// Checksum stored in the version table.
    pub expected: i32,
    /// Checksum computed from the current file.
    pub found: i32,
}

impl fmt::Display for ChecksumDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.script, self.expected, self.found
        )
    }
}

fn format_divergences(divergences: &[ChecksumDivergence]) -> String {
    divergences
        .iter()
        .map(|d| format!("  {}", d))
        .collect::<Vec<_>>()
        .join("\n")
}

/// All error types that BloomDB operations can produce.
#[derive(Error, Debug)]
pub enum BloomError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The connection string uses a scheme no dialect is registered for.
    #[error("Unknown connection scheme '{0}'. Supported: sqlite:, postgres://, mysql://, oracle://")]
    UnknownScheme(String),

    /// The dialect is recognised but this build does not include its driver.
    #[error("The {0} dialect is not enabled in this build. Rebuild with `--features {0}`.")]
    DialectNotEnabled(String),

    /// A PostgreSQL query or connection operation failed.
    #[error("Database error: {}", format_db_error(.0))]
    DatabaseError(#[from] tokio_postgres::Error),

    /// A SQLite query or connection operation failed.
    #[error("Database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A MySQL query or connection operation failed.
    #[error("Database error: {0}")]
    MysqlError(#[from] sqlx::Error),

    /// An Oracle query or connection operation failed.
    #[cfg(feature = "oracle")]
    #[error("Database error: {0}")]
    OracleError(#[from] oracle::Error),

    /// The adapter's connection is closed or its lock is poisoned.
    #[error("Database connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Connecting did not finish within the configured timeout.
    #[error("Timed out connecting to the database after {secs}s")]
    ConnectionTimeout { secs: u32 },

    /// A filesystem I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A file looks like a migration but does not follow the naming grammar.
    #[error("Migration parse error: {0}")]
    MigrationParseError(String),

    /// The version part of a migration filename is not a dotted number.
    #[error("invalid version format '{version}' in {file}")]
    InvalidVersion { file: String, version: String },

    /// Two files resolve to the same migration identity and filter.
    #[error("Duplicate migration {identity}: {first} and {second}")]
    DuplicateMigration {
        identity: String,
        first: String,
        second: String,
    },

    /// The version table does not exist yet.
    #[error("Version table {table} does not exist. Run 'baseline' first.")]
    VersionTableMissing { table: String },

    /// The version table has no baseline row.
    #[error("Version table {table} has no baseline row. Run 'baseline' first.")]
    BaselineMissing { table: String },

    /// The version table has more than one baseline row.
    #[error("Version table {table} contains {count} baseline rows; exactly one is expected.")]
    MultipleBaselines { table: String, count: usize },

    /// The version table records migrations that failed.
    #[error("Version table {table} contains failed migrations ({scripts}). Run 'repair' before migrating.")]
    FailedMigrationsPresent { table: String, scripts: String },

    /// Applied migrations were modified on disk after being applied.
    #[error("Checksum mismatch for {} applied migration(s). Run 'repair' to realign history:\n{}", .0.len(), format_divergences(.0))]
    ChecksumMismatch(Vec<ChecksumDivergence>),

    /// A migration body failed to execute.
    #[error("Migration failed for {script}: {reason}")]
    MigrationFailed { script: String, reason: String },

    /// Writing the history row for a migration failed.
    #[error("Failed to record {script} in the version table: {reason}")]
    RecordFailed { script: String, reason: String },

    /// A migrate run stopped after applying some migrations.
    ///
    /// `report` lists the migrations applied before `cause` ended the run.
    #[error("{cause}")]
    MigrateIncomplete {
        report: Box<MigrateReport>,
        cause: Box<BloomError>,
    },

    /// A termination signal arrived; the run stopped between migrations.
    #[error("Interrupted; stopped before {next}")]
    Interrupted { next: String },

    /// A `${key}` placeholder in the post-migration script has no value.
    #[error("Placeholder '{key}' not found. Available placeholders: {available}")]
    PlaceholderNotFound { key: String, available: String },

    /// The post-migration script failed to execute.
    #[error("Post-migration script {script} failed: {reason}")]
    PostMigrationFailed { script: String, reason: String },

    /// Destroy was requested without the confirmation word.
    #[error("Destroy aborted: confirmation must be exactly 'DESTROY'.")]
    DestroyNotConfirmed,
}

impl BloomError {
    /// The error that ended the run, looking through a partial migrate report.
    pub fn cause(&self) -> &BloomError {
        match self {
            BloomError::MigrateIncomplete { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// Render an adapter error with server-side detail when available.
    pub fn detail(&self) -> String {
        match self {
            BloomError::DatabaseError(e) => format_db_error(e),
            other => other.to_string(),
        }
    }
}

/// Convenience type alias for `Result<T, BloomError>`.
pub type Result<T> = std::result::Result<T, BloomError>;
