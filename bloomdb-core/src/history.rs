//! Version table records and the helpers the commands share.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::Storage;
use crate::error::{BloomError, Result};
use crate::version::MigrationVersion;

/// Default value of the `installed_by` column.
pub const INSTALLED_BY: &str = "bloomdb";

/// Description and script of the baseline row.
pub const BASELINE_DESCRIPTION: &str = "<< Baseline >>";

/// Value of the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationType {
    #[serde(rename = "BASELINE")]
    Baseline,
    #[serde(rename = "versioned")]
    Versioned,
    #[serde(rename = "repeatable")]
    Repeatable,
}

impl MigrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Baseline => "BASELINE",
            MigrationType::Versioned => "versioned",
            MigrationType::Repeatable => "repeatable",
        }
    }
}

impl std::fmt::Display for MigrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MigrationType {
    type Err = BloomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(MigrationType::Baseline),
            "versioned" => Ok(MigrationType::Versioned),
            "repeatable" => Ok(MigrationType::Repeatable),
            other => Err(BloomError::ConfigError(format!(
                "Unknown migration type '{}' in version table",
                other
            ))),
        }
    }
}

/// A row of the version table.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRecord {
    pub installed_rank: i64,
    /// `None` for repeatable migrations.
    pub version: Option<String>,
    pub description: String,
    pub migration_type: MigrationType,
    pub script: String,
    /// `None` for the baseline row.
    pub checksum: Option<i32>,
    pub installed_by: String,
    /// Not every driver reports a parseable timestamp.
    pub installed_on: Option<NaiveDateTime>,
    pub execution_time: i64,
    pub success: bool,
}

impl MigrationRecord {
    pub fn parsed_version(&self) -> Option<MigrationVersion> {
        self.version.as_deref().map(MigrationVersion::tolerant)
    }

    pub fn is_baseline(&self) -> bool {
        self.migration_type == MigrationType::Baseline
    }
}

/// A row about to be written. `installed_on` is always set by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub installed_rank: i64,
    pub version: Option<String>,
    pub description: String,
    pub migration_type: MigrationType,
    pub script: String,
    pub checksum: Option<i32>,
    pub installed_by: String,
    pub execution_time: i64,
    pub success: bool,
}

/// All baseline rows, in rank order.
pub fn baseline_records(records: &[MigrationRecord]) -> Vec<&MigrationRecord> {
    records.iter().filter(|r| r.is_baseline()).collect()
}

/// Highest version among rows with a version, baseline included.
pub fn greatest_applied_version(records: &[MigrationRecord]) -> Option<MigrationVersion> {
    records.iter().filter_map(|r| r.parsed_version()).max()
}

/// `max(installed_rank) + 1`, or 1 for an empty table.
pub fn next_rank(records: &[MigrationRecord]) -> i64 {
    records
        .iter()
        .map(|r| r.installed_rank)
        .max()
        .map_or(1, |max| max + 1)
}

/// Read the current history and allocate the next rank.
///
/// Not safe against concurrent writers.
pub async fn allocate_rank(storage: &dyn Storage, table: &str) -> Result<i64> {
    let records = storage.list_records(table).await?;
    Ok(next_rank(&records))
}

/// Verify the version table exists and holds exactly one baseline row.
///
/// Returns the history and the baseline version.
pub async fn require_baseline(
    storage: &dyn Storage,
    table: &str,
) -> Result<(Vec<MigrationRecord>, MigrationVersion)> {
    if !storage.table_exists(table).await? {
        return Err(BloomError::VersionTableMissing {
            table: table.to_string(),
        });
    }
    let records = storage.list_records(table).await?;
    let baseline = {
        let baselines = baseline_records(&records);
        match baselines.as_slice() {
            [] => {
                return Err(BloomError::BaselineMissing {
                    table: table.to_string(),
                })
            }
            [only] => only
                .parsed_version()
                .unwrap_or_else(|| MigrationVersion::tolerant("0")),
            many => {
                return Err(BloomError::MultipleBaselines {
                    table: table.to_string(),
                    count: many.len(),
                })
            }
        }
    };
    Ok((records, baseline))
}
