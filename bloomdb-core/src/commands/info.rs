//! Show migration status: what is applied, pending, changed or missing.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::BloomConfig;
use crate::db::Storage;
use crate::directory::MigrationDirectory;
use crate::error::Result;
use crate::history::{self, MigrationRecord, MigrationType};
use crate::migration::load_migrations;
use crate::version::MigrationVersion;

/// The state of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Success,
    Failed,
    /// Applied, but the file has changed since.
    Checksum,
    /// Recorded above the baseline with no file on disk.
    Missing,
    Baseline,
    BelowBaseline,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MigrationState::Pending => "pending",
            MigrationState::Success => "success",
            MigrationState::Failed => "failed",
            MigrationState::Checksum => "checksum",
            MigrationState::Missing => "missing",
            MigrationState::Baseline => "baseline",
            MigrationState::BelowBaseline => "below baseline",
        };
        f.write_str(label)
    }
}

/// Combined view of a migration (file + history).
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub version: Option<String>,
    pub description: String,
    pub script: String,
    pub migration_type: MigrationType,
    pub state: MigrationState,
    pub installed_rank: Option<i64>,
    pub installed_on: Option<NaiveDateTime>,
    pub execution_time: Option<i64>,
    /// Checksum of the file, or of the record when there is no file.
    pub checksum: Option<i32>,
}

impl MigrationInfo {
    fn with_record(mut self, record: Option<&MigrationRecord>) -> Self {
        if let Some(r) = record {
            self.installed_rank = Some(r.installed_rank);
            self.installed_on = r.installed_on;
            self.execution_time = Some(r.execution_time);
        }
        self
    }

    fn from_record(record: &MigrationRecord, state: MigrationState) -> Self {
        MigrationInfo {
            version: record.version.clone(),
            description: record.description.clone(),
            script: record.script.clone(),
            migration_type: record.migration_type,
            state,
            installed_rank: None,
            installed_on: None,
            execution_time: None,
            checksum: record.checksum,
        }
        .with_record(Some(record))
    }
}

fn applied_state(record: Option<&MigrationRecord>, checksum: i32) -> MigrationState {
    match record {
        None => MigrationState::Pending,
        Some(r) if !r.success => MigrationState::Failed,
        Some(r) if r.checksum != Some(checksum) => MigrationState::Checksum,
        Some(_) => MigrationState::Success,
    }
}

fn latest_versioned<'a>(
    records: &'a [MigrationRecord],
    version: &MigrationVersion,
) -> Option<&'a MigrationRecord> {
    records.iter().rev().find(|r| {
        r.migration_type == MigrationType::Versioned && r.parsed_version().as_ref() == Some(version)
    })
}

/// Execute the info command for one migration directory.
///
/// Versioned rows come first sorted by version, then repeatable rows in
/// file order.
pub async fn execute(
    storage: &dyn Storage,
    config: &BloomConfig,
    dir: &MigrationDirectory,
) -> Result<Vec<MigrationInfo>> {
    let table = dir.version_table.as_str();
    let (records, baseline) = history::require_baseline(storage, table).await?;
    let loaded = load_migrations(&dir.path, &config.filter_mode())?;

    let baseline_record = history::baseline_records(&records).first().copied();

    let mut versioned: Vec<(MigrationVersion, MigrationInfo)> = Vec::new();

    for file in &loaded.versioned {
        let record = latest_versioned(&records, &file.version);
        let (state, record) = match file.version.cmp(&baseline) {
            Ordering::Less => (MigrationState::BelowBaseline, record),
            Ordering::Equal => (MigrationState::Baseline, record.or(baseline_record)),
            Ordering::Greater => (applied_state(record, file.checksum), record),
        };
        let info = MigrationInfo {
            version: Some(file.version.raw.clone()),
            description: file.description.clone(),
            script: file.script(),
            migration_type: MigrationType::Versioned,
            state,
            installed_rank: None,
            installed_on: None,
            execution_time: None,
            checksum: Some(file.checksum),
        }
        .with_record(record);
        versioned.push((file.version.clone(), info));
    }

    if let Some(b) = baseline_record {
        if loaded.find_versioned(&baseline).is_none() {
            versioned.push((baseline.clone(), MigrationInfo::from_record(b, MigrationState::Baseline)));
        }
    }

    for record in &records {
        if record.migration_type != MigrationType::Versioned {
            continue;
        }
        let Some(version) = record.parsed_version() else {
            continue;
        };
        if version <= baseline || loaded.find_versioned(&version).is_some() {
            continue;
        }
        if latest_versioned(&records, &version).map(|r| r.installed_rank) != Some(record.installed_rank) {
            continue;
        }
        versioned.push((version, MigrationInfo::from_record(record, MigrationState::Missing)));
    }

    versioned.sort_by(|a, b| a.0.cmp(&b.0));

    let mut infos: Vec<MigrationInfo> = versioned.into_iter().map(|(_, info)| info).collect();

    for file in &loaded.repeatable {
        let record = records.iter().rev().find(|r| {
            r.migration_type == MigrationType::Repeatable && r.description == file.description
        });
        infos.push(
            MigrationInfo {
                version: None,
                description: file.description.clone(),
                script: file.script(),
                migration_type: MigrationType::Repeatable,
                state: applied_state(record, file.checksum),
                installed_rank: None,
                installed_on: None,
                execution_time: None,
                checksum: Some(file.checksum),
            }
            .with_record(record),
        );
    }

    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::record;

    #[test]
    fn test_applied_state_precedence() {
        assert_eq!(applied_state(None, 1), MigrationState::Pending);

        let failed = record(2, Some("2"), MigrationType::Versioned, Some(9), false);
        assert_eq!(applied_state(Some(&failed), 1), MigrationState::Failed);

        let changed = record(2, Some("2"), MigrationType::Versioned, Some(9), true);
        assert_eq!(applied_state(Some(&changed), 1), MigrationState::Checksum);

        let same = record(2, Some("2"), MigrationType::Versioned, Some(1), true);
        assert_eq!(applied_state(Some(&same), 1), MigrationState::Success);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MigrationState::BelowBaseline.to_string(), "below baseline");
        assert_eq!(MigrationState::Checksum.to_string(), "checksum");
        assert_eq!(MigrationState::Baseline.to_string(), "baseline");
    }
}
