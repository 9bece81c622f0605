//! Repair the version table: drop failed rows and realign changed files.

use serde::Serialize;

use crate::config::BloomConfig;
use crate::db::Storage;
use crate::directory::MigrationDirectory;
use crate::error::Result;
use crate::history::{self, MigrationType};
use crate::migration::load_migrations;

/// Report returned after a repair operation.
#[derive(Debug, Serialize)]
pub struct RepairReport {
    pub table: String,
    /// Number of failed rows removed.
    pub failed_removed: u64,
    /// Number of rows whose description or checksum was realigned.
    pub records_updated: usize,
    /// One line per realigned row.
    pub details: Vec<String>,
    /// Recorded migrations whose file is gone.
    pub warnings: Vec<String>,
}

/// Execute the repair command for one migration directory.
///
/// Repeatable rows are left alone; they are re-applied by the next migrate.
pub async fn execute(
    storage: &dyn Storage,
    config: &BloomConfig,
    dir: &MigrationDirectory,
) -> Result<RepairReport> {
    let table = dir.version_table.as_str();
    let (records, baseline) = history::require_baseline(storage, table).await?;
    let loaded = load_migrations(&dir.path, &config.filter_mode())?;

    let failed_removed = storage.delete_failed(table).await?;
    if failed_removed > 0 {
        log::info!(
            "Removed failed migration records; count={}, table={}",
            failed_removed,
            table
        );
    }

    let mut details = Vec::new();
    let mut warnings = Vec::new();

    for record in records
        .iter()
        .filter(|r| r.success && r.migration_type == MigrationType::Versioned)
    {
        let Some(version) = record.parsed_version() else {
            continue;
        };
        if version <= baseline {
            continue;
        }

        let Some(file) = loaded.find_versioned(&version) else {
            let warning = format!("{}: migration file not found, record left unchanged", record.script);
            log::warn!("Migration file missing during repair; script={}, table={}", record.script, table);
            warnings.push(warning);
            continue;
        };

        if file.description == record.description && record.checksum == Some(file.checksum) {
            continue;
        }

        storage
            .update_record(
                table,
                record.installed_rank,
                record.version.as_deref(),
                &file.description,
                Some(file.checksum),
            )
            .await?;

        log::info!(
            "Realigned migration record; script={}, checksum={}, table={}",
            record.script,
            file.checksum,
            table
        );
        details.push(format!(
            "{}: checksum {} -> {}, description '{}' -> '{}'",
            record.script,
            record
                .checksum
                .map_or_else(|| "NULL".to_string(), |c| c.to_string()),
            file.checksum,
            record.description,
            file.description
        ));
    }

    Ok(RepairReport {
        table: table.to_string(),
        failed_removed,
        records_updated: details.len(),
        details,
        warnings,
    })
}
