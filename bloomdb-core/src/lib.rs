//! Flyway-style migration library for SQLite, PostgreSQL, MySQL and Oracle.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bloomdb_core::config::{BloomConfig, CliOverrides};
//! use bloomdb_core::BloomDb;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BloomConfig::load(None, &CliOverrides::default())?;
//! let bloom = BloomDb::new(config).await?;
//! for dir in bloom.directories()? {
//!     let report = bloom.migrate(&dir).await?;
//!     println!("Applied {} migrations to {}", report.migrations_applied, report.table);
//! }
//! bloom.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] — Configuration loading (TOML, env vars, CLI overrides) and connection strings
//! - [`version`] — Dotted-numeric version ordering
//! - [`checksum`] — CRC32 over line-normalized file contents
//! - [`migration`] — Migration filename grammar and directory loading
//! - [`filter`] — Selection among filtered file variants
//! - [`directory`] — Single-directory vs. subdirectory fan-out
//! - [`db`] — The `Storage` trait and one adapter per dialect
//! - [`history`] — Version table records and shared helpers
//! - [`placeholder`] — Post-migration script with `${key}` substitution
//! - [`commands`] — Individual command implementations
//! - [`error`] — Error types

pub mod checksum;
pub mod commands;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod filter;
pub mod history;
pub mod migration;
pub mod placeholder;
pub mod version;

use std::sync::atomic::{AtomicBool, Ordering};

use config::BloomConfig;
use db::Storage;
use directory::MigrationDirectory;
use error::Result;

pub use commands::baseline::BaselineReport;
pub use commands::destroy::DestroyReport;
pub use commands::info::{MigrationInfo, MigrationState};
pub use commands::migrate::MigrateReport;
pub use commands::repair::RepairReport;
pub use config::CliOverrides;
pub use error::BloomError;

/// Main entry point for the BloomDB library.
///
/// Owns the configuration and the database connection for the lifetime of
/// one command run.
pub struct BloomDb {
    pub config: BloomConfig,
    storage: Box<dyn Storage>,
    shutdown: AtomicBool,
}

impl BloomDb {
    /// Resolve the connection string and connect, retrying as configured.
    pub async fn new(config: BloomConfig) -> Result<Self> {
        let target = config.connection_target()?;
        let storage = db::connect(&target, config.connect_options()).await?;
        Ok(Self::with_storage(config, storage))
    }

    /// Create an instance around an already connected adapter.
    pub fn with_storage(config: BloomConfig, storage: Box<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Ask a running migrate to stop at the next migration boundary.
    ///
    /// The migration in flight still completes and is recorded.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Migration targets under the configured path.
    pub fn directories(&self) -> Result<Vec<MigrationDirectory>> {
        directory::discover(&self.config.migrations.path, &self.config.migrations.table_name)
    }

    /// Record a baseline in the directory's version table.
    pub async fn baseline(&self, dir: &MigrationDirectory) -> Result<BaselineReport> {
        commands::baseline::execute(self.storage(), &self.config, &dir.version_table).await
    }

    /// Apply pending migrations.
    ///
    /// On failure after some migrations were applied the error is
    /// [`BloomError::MigrateIncomplete`], which carries their report.
    pub async fn migrate(&self, dir: &MigrationDirectory) -> Result<MigrateReport> {
        commands::migrate::execute(self.storage(), &self.config, dir, &self.shutdown).await
    }

    /// Show migration status information.
    pub async fn info(&self, dir: &MigrationDirectory) -> Result<Vec<MigrationInfo>> {
        commands::info::execute(self.storage(), &self.config, dir).await
    }

    /// Repair the version table.
    pub async fn repair(&self, dir: &MigrationDirectory) -> Result<RepairReport> {
        commands::repair::execute(self.storage(), &self.config, dir).await
    }

    /// Drop every object in the target schema. `confirmation` must be `DESTROY`.
    pub async fn destroy(&self, confirmation: &str) -> Result<DestroyReport> {
        commands::destroy::execute(self.storage(), confirmation).await
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
