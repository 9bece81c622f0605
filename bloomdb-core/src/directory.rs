//! Single-directory vs. subdirectory fan-out.
//!
//! Migration files at the top level of the migration path mean a single
//! target tracked in the configured version table. Otherwise every
//! first-level subdirectory holding migrations becomes its own target with
//! a version table derived from the directory name.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::db::validate_identifier;
use crate::error::Result;
use crate::migration::migration_file_names;

/// One migration target: a directory and the version table tracking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationDirectory {
    pub path: PathBuf,
    /// Subdirectory name; empty for the root target.
    pub name: String,
    pub version_table: String,
    pub is_subdirectory: bool,
}

impl MigrationDirectory {
    /// The root target, tracked in the configured default table.
    pub fn root(path: &Path, default_table: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            name: String::new(),
            version_table: default_table.to_string(),
            is_subdirectory: false,
        }
    }

    fn subdirectory(path: PathBuf, name: &str) -> Self {
        Self {
            path,
            name: name.to_string(),
            version_table: version_table_for(name),
            is_subdirectory: true,
        }
    }
}

/// `"BLOOMDB_" + upper(replace(name, '-', '_'))`.
pub fn version_table_for(name: &str) -> String {
    format!("BLOOMDB_{}", name.replace('-', "_").to_uppercase())
}

/// Decide the migration targets under `root`.
pub fn discover(root: &Path, default_table: &str) -> Result<Vec<MigrationDirectory>> {
    if !migration_file_names(root)?.is_empty() {
        log::debug!("Migrations found at top level; path={}", root.display());
        return Ok(vec![MigrationDirectory::root(root, default_table)]);
    }

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        subdirs.push((name, path));
    }
    subdirs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut targets = Vec::new();
    for (name, path) in subdirs {
        if migration_file_names(&path)?.is_empty() {
            continue;
        }
        let target = MigrationDirectory::subdirectory(path, &name);
        validate_identifier(&target.version_table)?;
        log::debug!(
            "Found migration subdirectory; name={}, table={}",
            target.name,
            target.version_table
        );
        targets.push(target);
    }

    if targets.is_empty() {
        return Ok(vec![MigrationDirectory::root(root, default_table)]);
    }
    Ok(targets)
}
