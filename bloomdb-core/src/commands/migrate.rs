//! Apply pending migrations to the database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::config::BloomConfig;
use crate::db::{DatabaseObject, ObjectDelta, Storage};
use crate::directory::MigrationDirectory;
use crate::error::{BloomError, ChecksumDivergence, Result};
use crate::history::{self, MigrationRecord, MigrationType, NewRecord};
use crate::migration::{load_migrations, LoadedMigrations};
use crate::placeholder::{self, ScriptContext};

/// Report returned after a migrate operation.
#[derive(Debug, Serialize)]
pub struct MigrateReport {
    pub table: String,
    /// Number of migrations that were applied in this run.
    pub migrations_applied: usize,
    /// Total execution time of all migrations in milliseconds.
    pub total_time_ms: i64,
    /// Per-migration details for each applied migration.
    pub details: Vec<MigrateDetail>,
    /// Post-migration script that ran, if any.
    pub post_migration: Option<String>,
}

/// Details of a single applied migration within a migrate run.
#[derive(Debug, Serialize)]
pub struct MigrateDetail {
    /// Version string, or None for repeatable migrations.
    pub version: Option<String>,
    pub description: String,
    pub script: String,
    pub migration_type: MigrationType,
    /// Execution time of this migration in milliseconds.
    pub execution_time_ms: i64,
    pub objects_created: Vec<DatabaseObject>,
    pub objects_dropped: Vec<DatabaseObject>,
}

/// A migration about to be applied, versioned or repeatable.
struct Pending<'a> {
    version: Option<String>,
    description: &'a str,
    script: String,
    body: &'a str,
    checksum: i32,
    migration_type: MigrationType,
    /// Rank of the row to overwrite when re-applying a repeatable migration.
    existing_rank: Option<i64>,
}

/// Execute the migrate command against one migration directory.
///
/// `shutdown` is checked between migrations: once set, the run stops at the
/// next boundary with [`BloomError::Interrupted`]. A body already running is
/// always finished and recorded. When a failure ends the run after some
/// migrations were applied, the error is [`BloomError::MigrateIncomplete`]
/// carrying their report.
pub async fn execute(
    storage: &dyn Storage,
    config: &BloomConfig,
    dir: &MigrationDirectory,
    shutdown: &AtomicBool,
) -> Result<MigrateReport> {
    let result = run_migrate(storage, config, dir, shutdown).await;

    match &result {
        Ok(report) => {
            log::info!(
                "Migrate completed; table={}, migrations_applied={}, total_time_ms={}",
                report.table,
                report.migrations_applied,
                report.total_time_ms
            );
        }
        Err(e) => {
            log::error!("Migrate failed; table={}: {}", dir.version_table, e);
        }
    }

    result
}

async fn run_migrate(
    storage: &dyn Storage,
    config: &BloomConfig,
    dir: &MigrationDirectory,
    shutdown: &AtomicBool,
) -> Result<MigrateReport> {
    let table = dir.version_table.as_str();

    let mut objects = snapshot_objects(storage).await;
    let loaded = load_migrations(&dir.path, &config.filter_mode())?;
    let (records, _baseline) = history::require_baseline(storage, table).await?;

    check_no_failures(&records, table)?;
    let divergences = checksum_divergences(&records, &loaded);
    if !divergences.is_empty() {
        return Err(BloomError::ChecksumMismatch(divergences));
    }

    let mut run = Run {
        storage,
        table,
        installed_by: config.migrations.installed_by.as_str(),
        shutdown,
        objects: &mut objects,
        details: Vec::new(),
    };
    let outcome = apply_all(&mut run, config, dir, &loaded, &records).await;
    let details = run.details;

    match outcome {
        Ok(post_migration) => Ok(build_report(table, details, post_migration)),
        Err(cause) if details.is_empty() => Err(cause),
        Err(cause) => Err(BloomError::MigrateIncomplete {
            report: Box::new(build_report(table, details, None)),
            cause: Box::new(cause),
        }),
    }
}

/// State of one migrate run; `details` grows as migrations are applied.
struct Run<'a> {
    storage: &'a dyn Storage,
    table: &'a str,
    installed_by: &'a str,
    shutdown: &'a AtomicBool,
    objects: &'a mut Vec<DatabaseObject>,
    details: Vec<MigrateDetail>,
}

impl Run<'_> {
    fn check_shutdown(&self, next: &str) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            log::warn!("Shutdown requested, stopping; table={}, next={}", self.table, next);
            return Err(BloomError::Interrupted {
                next: next.to_string(),
            });
        }
        Ok(())
    }

    async fn apply(&mut self, pending: &Pending<'_>) -> Result<()> {
        self.check_shutdown(&pending.script)?;
        let detail = apply(self.storage, self.table, self.installed_by, pending, self.objects).await?;
        self.details.push(detail);
        Ok(())
    }
}

/// Pending versioned migrations, then changed repeatables, then the
/// post-migration script. Returns the script that ran, if any.
async fn apply_all(
    run: &mut Run<'_>,
    config: &BloomConfig,
    dir: &MigrationDirectory,
    loaded: &LoadedMigrations,
    records: &[MigrationRecord],
) -> Result<Option<String>> {
    let greatest = history::greatest_applied_version(records);

    for migration in loaded
        .versioned
        .iter()
        .filter(|m| greatest.as_ref().map_or(true, |g| &m.version > g))
    {
        let pending = Pending {
            version: Some(migration.version.raw.clone()),
            description: &migration.description,
            script: migration.script(),
            body: &migration.body,
            checksum: migration.checksum,
            migration_type: MigrationType::Versioned,
            existing_rank: None,
        };
        run.apply(&pending).await?;
    }

    let records = run.storage.list_records(run.table).await?;
    for migration in &loaded.repeatable {
        let existing = latest_repeatable(&records, &migration.description);
        if existing.is_some_and(|r| r.success && r.checksum == Some(migration.checksum)) {
            log::debug!(
                "Repeatable migration unchanged; script={}",
                migration.script()
            );
            continue;
        }
        let pending = Pending {
            version: None,
            description: &migration.description,
            script: migration.script(),
            body: &migration.body,
            checksum: migration.checksum,
            migration_type: MigrationType::Repeatable,
            existing_rank: existing.map(|r| r.installed_rank),
        };
        run.apply(&pending).await?;
    }

    let Some(script) = &config.migrations.post_migration_script else {
        return Ok(None);
    };
    let name = script.display().to_string();
    run.check_shutdown(&name)?;
    let ctx = ScriptContext {
        table: run.table,
        dialect: run.storage.dialect(),
        directory: &dir.path,
        applied: run.details.len(),
    };
    placeholder::run_post_migration(run.storage, script, &config.placeholders, &ctx).await?;
    Ok(Some(name))
}

fn build_report(table: &str, details: Vec<MigrateDetail>, post_migration: Option<String>) -> MigrateReport {
    MigrateReport {
        table: table.to_string(),
        migrations_applied: details.len(),
        total_time_ms: details.iter().map(|d| d.execution_time_ms).sum(),
        details,
        post_migration,
    }
}

/// Current schema objects; an adapter failure degrades to an empty snapshot.
async fn snapshot_objects(storage: &dyn Storage) -> Vec<DatabaseObject> {
    match storage.list_database_objects().await {
        Ok(objects) => objects,
        Err(e) => {
            log::warn!("Could not list database objects, object changes will not be reported: {}", e);
            Vec::new()
        }
    }
}

fn check_no_failures(records: &[MigrationRecord], table: &str) -> Result<()> {
    let failed: Vec<&str> = records
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.script.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(BloomError::FailedMigrationsPresent {
        table: table.to_string(),
        scripts: failed.join(", "),
    })
}

/// Successful versioned rows whose file on disk no longer has the stored checksum.
///
/// Rows without a matching file are skipped; `info` reports them as missing.
pub(crate) fn checksum_divergences(
    records: &[MigrationRecord],
    loaded: &LoadedMigrations,
) -> Vec<ChecksumDivergence> {
    records
        .iter()
        .filter(|r| r.success && r.migration_type == MigrationType::Versioned)
        .filter_map(|r| {
            let version = r.parsed_version()?;
            let file = loaded.find_versioned(&version)?;
            if r.checksum == Some(file.checksum) {
                return None;
            }
            Some(ChecksumDivergence {
                script: r.script.clone(),
                expected: r.checksum.unwrap_or_default(),
                found: file.checksum,
            })
        })
        .collect()
}

fn latest_repeatable<'a>(records: &'a [MigrationRecord], description: &str) -> Option<&'a MigrationRecord> {
    records
        .iter()
        .rev()
        .find(|r| r.migration_type == MigrationType::Repeatable && r.description == description)
}

/// Run one body and record the outcome; a failed body still gets a `success = 0` row.
async fn apply(
    storage: &dyn Storage,
    table: &str,
    installed_by: &str,
    pending: &Pending<'_>,
    objects: &mut Vec<DatabaseObject>,
) -> Result<MigrateDetail> {
    log::info!(
        "Applying migration; script={}, table={}",
        pending.script,
        table
    );

    let start = Instant::now();
    let outcome = storage.execute_migration(pending.body).await;
    let execution_time_ms = start.elapsed().as_millis() as i64;

    let recorded = record(storage, table, installed_by, pending, execution_time_ms, outcome.is_ok()).await;

    match (outcome, recorded) {
        (Ok(()), Ok(())) => {}
        (Err(e), Ok(())) => {
            return Err(BloomError::MigrationFailed {
                script: pending.script.clone(),
                reason: e.detail(),
            });
        }
        (Ok(()), Err(w)) => {
            return Err(BloomError::RecordFailed {
                script: pending.script.clone(),
                reason: format!("{} (the migration itself succeeded)", w.detail()),
            });
        }
        (Err(e), Err(w)) => {
            return Err(BloomError::RecordFailed {
                script: pending.script.clone(),
                reason: format!("{} (after the migration failed: {})", w.detail(), e.detail()),
            });
        }
    }

    let after = snapshot_objects(storage).await;
    let delta = ObjectDelta::between(objects, &after);
    *objects = after;

    log::info!(
        "Applied migration; script={}, execution_time_ms={}, objects_created={}, objects_dropped={}",
        pending.script,
        execution_time_ms,
        delta.created.len(),
        delta.dropped.len()
    );

    Ok(MigrateDetail {
        version: pending.version.clone(),
        description: pending.description.to_string(),
        script: pending.script.clone(),
        migration_type: pending.migration_type,
        execution_time_ms,
        objects_created: delta.created,
        objects_dropped: delta.dropped,
    })
}

async fn record(
    storage: &dyn Storage,
    table: &str,
    installed_by: &str,
    pending: &Pending<'_>,
    execution_time_ms: i64,
    success: bool,
) -> Result<()> {
    let installed_rank = match pending.existing_rank {
        Some(rank) => rank,
        None => history::allocate_rank(storage, table).await?,
    };
    let row = NewRecord {
        installed_rank,
        version: pending.version.clone(),
        description: pending.description.to_string(),
        migration_type: pending.migration_type,
        script: pending.script.clone(),
        checksum: Some(pending.checksum),
        installed_by: installed_by.to_string(),
        execution_time: execution_time_ms,
        success,
    };
    match pending.existing_rank {
        Some(rank) => storage.update_record_full(table, rank, &row).await,
        None => storage.insert_record(table, &row).await,
    }
}
