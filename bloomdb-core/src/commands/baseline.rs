//! Mark a database as being at a specific version.

use serde::Serialize;

use crate::config::BloomConfig;
use crate::db::Storage;
use crate::error::{BloomError, Result};
use crate::history;
use crate::version;

/// Version used when neither the CLI nor the environment names one.
pub const DEFAULT_BASELINE_VERSION: &str = "1";

/// Report returned after a baseline operation.
#[derive(Debug, Serialize)]
pub struct BaselineReport {
    /// The baseline version now recorded in the table.
    pub version: String,
    pub table: String,
    /// False when a baseline row already existed and was left alone.
    pub created: bool,
}

/// Execute the baseline command.
///
/// 1. Return the existing baseline if the table already has one
/// 2. Create the version table if missing
/// 3. Insert a single baseline row at rank `version_to_int(version)`
pub async fn execute(
    storage: &dyn Storage,
    config: &BloomConfig,
    table: &str,
) -> Result<BaselineReport> {
    if storage.table_exists(table).await? {
        let records = storage.list_records(table).await?;
        if let Some(existing) = history::baseline_records(&records).first() {
            let version = existing.version.clone().unwrap_or_default();
            log::info!(
                "Baseline already present, leaving it unchanged; version={}, table={}",
                version,
                table
            );
            return Ok(BaselineReport {
                version,
                table: table.to_string(),
                created: false,
            });
        }
    }

    let version = config
        .migrations
        .baseline_version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_BASELINE_VERSION);
    if !version::is_valid(version) {
        return Err(BloomError::ConfigError(format!(
            "Baseline version '{}' is not a dotted number",
            version
        )));
    }

    storage.create_version_table(table).await?;
    storage
        .insert_baseline(table, version, &config.migrations.installed_by)
        .await?;

    log::info!(
        "Successfully baselined; version={}, table={}",
        version,
        table
    );
    Ok(BaselineReport {
        version: version.to_string(),
        table: table.to_string(),
        created: true,
    })
}
