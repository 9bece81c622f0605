//! Migration filename grammar and directory loading.
//!
//! Versioned files are named `V<version>__<description>[.<filter>].sql`,
//! repeatable files `R__<description>[.<filter>].sql`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::checksum;
use crate::error::{BloomError, Result};
use crate::filter::{self, FilterMode, Filtered};
use crate::version::{self, MigrationVersion};

static VERSIONED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^V(.+?)__(.+?)(?:\.([^.]+))?\.sql$").unwrap());

static REPEATABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^R__(.+?)(?:\.([^.]+))?\.sql$").unwrap());

/// Result of parsing a migration filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    Versioned {
        version: MigrationVersion,
        description: String,
        filter: Option<String>,
    },
    Repeatable {
        description: String,
        filter: Option<String>,
    },
}

/// Whether a filename is shaped like a migration at all.
///
/// Files that are not are ignored by the loader; files that are but fail
/// the grammar are load errors.
pub fn looks_like_migration(file_name: &str) -> bool {
    if !file_name.ends_with(".sql") {
        return false;
    }
    (file_name.starts_with('V') && file_name.contains("__")) || file_name.starts_with("R__")
}

/// Parse a migration filename.
///
/// Returns `Ok(None)` for files that are not migrations.
pub fn parse_file_name(file_name: &str) -> Result<Option<ParsedName>> {
    if !looks_like_migration(file_name) {
        return Ok(None);
    }

    if let Some(caps) = VERSIONED_RE.captures(file_name) {
        let raw_version = &caps[1];
        if !version::is_valid(raw_version) {
            return Err(BloomError::InvalidVersion {
                file: file_name.to_string(),
                version: raw_version.to_string(),
            });
        }
        return Ok(Some(ParsedName::Versioned {
            version: MigrationVersion::tolerant(raw_version),
            description: caps[2].to_string(),
            filter: caps.get(3).map(|m| m.as_str().to_string()),
        }));
    }

    if let Some(caps) = REPEATABLE_RE.captures(file_name) {
        return Ok(Some(ParsedName::Repeatable {
            description: caps[1].to_string(),
            filter: caps.get(2).map(|m| m.as_str().to_string()),
        }));
    }

    Err(BloomError::MigrationParseError(format!(
        "'{}' looks like a migration but does not match V<version>__<description>[.<filter>].sql or R__<description>[.<filter>].sql",
        file_name
    )))
}

/// A versioned (run-once) migration loaded from disk.
#[derive(Debug, Clone, Serialize)]
pub struct VersionedMigration {
    pub version: MigrationVersion,
    pub description: String,
    pub filter: Option<String>,
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub body: String,
    pub checksum: i32,
}

impl VersionedMigration {
    /// Canonical script identifier stored in the version table.
    pub fn script(&self) -> String {
        format!("V{}__{}", self.version.raw, self.description)
    }
}

/// A repeatable migration loaded from disk.
#[derive(Debug, Clone, Serialize)]
pub struct RepeatableMigration {
    pub description: String,
    pub filter: Option<String>,
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub body: String,
    pub checksum: i32,
}

impl RepeatableMigration {
    /// Canonical script identifier stored in the version table.
    pub fn script(&self) -> String {
        format!("R__{}", self.description)
    }
}

impl Filtered for VersionedMigration {
    fn identity_key(&self) -> String {
        self.version.key()
    }
    fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

impl Filtered for RepeatableMigration {
    fn identity_key(&self) -> String {
        self.description.clone()
    }
    fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

/// Both migration sets of one directory.
#[derive(Debug, Clone, Default)]
pub struct LoadedMigrations {
    /// Sorted ascending by version.
    pub versioned: Vec<VersionedMigration>,
    /// In filename order.
    pub repeatable: Vec<RepeatableMigration>,
}

impl LoadedMigrations {
    pub fn find_versioned(&self, version: &MigrationVersion) -> Option<&VersionedMigration> {
        self.versioned.iter().find(|m| &m.version == version)
    }

    pub fn find_repeatable(&self, description: &str) -> Option<&RepeatableMigration> {
        self.repeatable.iter().find(|m| m.description == description)
    }
}

/// A parsed filename waiting for filter selection.
struct Candidate {
    parsed: ParsedName,
    file_name: String,
    path: PathBuf,
}

impl Filtered for Candidate {
    fn identity_key(&self) -> String {
        match &self.parsed {
            ParsedName::Versioned { version, .. } => format!("V:{}", version.key()),
            ParsedName::Repeatable { description, .. } => format!("R:{}", description),
        }
    }
    fn filter(&self) -> Option<&str> {
        match &self.parsed {
            ParsedName::Versioned { filter, .. } | ParsedName::Repeatable { filter, .. } => {
                filter.as_deref()
            }
        }
    }
}

/// List the migration-shaped files directly inside `dir`, sorted by name.
///
/// Subdirectories are not descended into.
pub fn migration_file_names(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if looks_like_migration(name) {
            files.push((name.to_string(), path.clone()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Load a directory's migrations, applying the filter mode.
///
/// Bodies are read and checksummed only for the files that survive selection.
pub fn load_migrations(dir: &Path, mode: &FilterMode) -> Result<LoadedMigrations> {
    let mut candidates = Vec::new();
    for (file_name, path) in migration_file_names(dir)? {
        if let Some(parsed) = parse_file_name(&file_name)? {
            candidates.push(Candidate {
                parsed,
                file_name,
                path,
            });
        }
    }

    check_duplicates(&candidates)?;

    let selected = filter::select(candidates, mode);

    let mut loaded = LoadedMigrations::default();
    for candidate in selected {
        let bytes = std::fs::read(&candidate.path)?;
        let checksum = checksum::calculate(&bytes);
        let body = decode_body(&candidate.file_name, bytes)?;
        match candidate.parsed {
            ParsedName::Versioned {
                version,
                description,
                filter,
            } => loaded.versioned.push(VersionedMigration {
                version,
                description,
                filter,
                file_name: candidate.file_name,
                path: candidate.path,
                body,
                checksum,
            }),
            ParsedName::Repeatable {
                description,
                filter,
            } => loaded.repeatable.push(RepeatableMigration {
                description,
                filter,
                file_name: candidate.file_name,
                path: candidate.path,
                body,
                checksum,
            }),
        }
    }

    loaded.versioned.sort_by(|a, b| a.version.cmp(&b.version));
    loaded.repeatable.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    log::debug!(
        "Loaded migrations; dir={}, filter={}, versioned={}, repeatable={}",
        dir.display(),
        mode,
        loaded.versioned.len(),
        loaded.repeatable.len()
    );

    Ok(loaded)
}

/// Two files with the same identity must differ in their filter.
fn check_duplicates(candidates: &[Candidate]) -> Result<()> {
    let mut seen: HashMap<(String, Option<&str>), &str> = HashMap::new();
    for c in candidates {
        let key = (c.identity_key(), c.filter());
        if let Some(first) = seen.insert(key, &c.file_name) {
            let identity = match &c.parsed {
                ParsedName::Versioned { version, .. } => format!("version {}", version),
                ParsedName::Repeatable { description, .. } => format!("R__{}", description),
            };
            return Err(BloomError::DuplicateMigration {
                identity,
                first: first.to_string(),
                second: c.file_name.clone(),
            });
        }
    }
    Ok(())
}

fn decode_body(file_name: &str, bytes: Vec<u8>) -> Result<String> {
    let text = String::from_utf8(bytes).map_err(|e| {
        BloomError::MigrationParseError(format!("{} is not valid UTF-8: {}", file_name, e))
    })?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
