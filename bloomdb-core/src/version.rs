//! Dotted-numeric migration versions and their total order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::error::{BloomError, Result};

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*$").unwrap());

/// Whether `version` matches `^\d+(\.\d+)*$`.
pub fn is_valid(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

/// Tolerant component-wise compare.
///
/// Missing components count as 0, and so do components that are not numbers,
/// so `"1.2"` equals `"1.2.0.0"` and `"4.2.22.1"` sorts after `"4.2.22"`.
/// Components of any length compare numerically.
pub fn compare(a: &str, b: &str) -> Ordering {
    MigrationVersion::tolerant(a).cmp(&MigrationVersion::tolerant(b))
}

/// Integer value of the first dotted component, or 0.
///
/// Used as the installed rank of the baseline row.
pub fn version_to_int(version: &str) -> i64 {
    version
        .split('.')
        .next()
        .and_then(|first| first.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Normalised digit strings: leading zeros stripped, non-numeric parts as `"0"`.
fn components(version: &str) -> Vec<String> {
    version
        .split('.')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return "0".to_string();
            }
            match part.trim_start_matches('0') {
                "" => "0".to_string(),
                digits => digits.to_string(),
            }
        })
        .collect()
}

/// Numeric order of two normalised digit strings.
fn compare_component(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// A parsed migration version.
///
/// Equality, ordering and hashing all ignore trailing zero components.
#[derive(Debug, Clone, Serialize)]
#[serde(into = "String")]
pub struct MigrationVersion {
    /// The version exactly as written in the filename or history row.
    pub raw: String,
    parts: Vec<String>,
}

impl MigrationVersion {
    /// Parse a version, rejecting anything outside the dotted-numeric grammar.
    pub fn parse(raw: &str) -> Result<Self> {
        if !is_valid(raw) {
            return Err(BloomError::InvalidVersion {
                file: String::new(),
                version: raw.to_string(),
            });
        }
        Ok(Self::tolerant(raw))
    }

    /// Build a version without validation; non-numeric components count as 0.
    pub fn tolerant(raw: &str) -> Self {
        let mut parts = components(raw);
        while parts.len() > 1 && parts.last().map(String::as_str) == Some("0") {
            parts.pop();
        }
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    /// Canonical key shared by all spellings of the same version (`1.2` and `1.2.0`).
    pub fn key(&self) -> String {
        self.parts.join(".")
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MigrationVersion {}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let x = self.parts.get(i).map_or("0", String::as_str);
            let y = other.parts.get(i).map_or("0", String::as_str);
            match compare_component(x, y) {
                Ordering::Equal => continue,
                o => return o,
            }
        }
        Ordering::Equal
    }
}

impl Hash for MigrationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<MigrationVersion> for String {
    fn from(v: MigrationVersion) -> Self {
        v.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid() {
        assert!(is_valid("1"));
        assert!(is_valid("1.2.3"));
        assert!(is_valid("20240101.1"));
        assert!(!is_valid(""));
        assert!(!is_valid("abc"));
        assert!(!is_valid("1."));
        assert!(!is_valid(".1"));
        assert!(!is_valid("1..2"));
        assert!(!is_valid("1_2"));
        assert!(!is_valid("v1"));
    }

    #[test]
    fn test_compare_trailing_zeros() {
        assert_eq!(compare("1.2", "1.2.0.0"), Ordering::Equal);
        assert_eq!(compare("1", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_compare_numeric_not_lexical() {
        assert_eq!(compare("4.2.22.1", "4.2.22"), Ordering::Greater);
        assert_eq!(compare("10", "9"), Ordering::Greater);
        assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let versions = ["1", "1.0", "1.1", "2", "2.0.1", "10", "abc", "0"];
        for a in versions {
            for b in versions {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_compare_non_numeric_is_zero() {
        assert_eq!(compare("abc", "0"), Ordering::Equal);
        assert_eq!(compare("1.x", "1"), Ordering::Equal);
    }

    #[test]
    fn test_version_to_int() {
        assert_eq!(version_to_int("1"), 1);
        assert_eq!(version_to_int("42.7.1"), 42);
        assert_eq!(version_to_int("0"), 0);
        assert_eq!(version_to_int("x.1"), 0);
        assert_eq!(version_to_int(""), 0);
    }

    #[test]
    fn test_migration_version_eq_and_hash() {
        use std::collections::HashSet;
        let a = MigrationVersion::parse("1.2").unwrap();
        let b = MigrationVersion::parse("1.2.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        let set: HashSet<MigrationVersion> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_migration_version_parse_rejects_garbage() {
        assert!(MigrationVersion::parse("1.a").is_err());
        assert!(MigrationVersion::parse("").is_err());
    }

    #[test]
    fn test_migration_version_sorting() {
        let mut versions: Vec<MigrationVersion> = ["10", "2", "1.1", "1", "1.0.1"]
            .iter()
            .map(|v| MigrationVersion::parse(v).unwrap())
            .collect();
        versions.sort();
        let raw: Vec<&str> = versions.iter().map(|v| v.raw.as_str()).collect();
        assert_eq!(raw, vec!["1", "1.0.1", "1.1", "2", "10"]);
    }

    #[test]
    fn test_compare_components_wider_than_u64() {
        let huge = "99999999999999999999";
        assert!(is_valid(huge));
        assert_eq!(compare(huge, "1"), Ordering::Greater);
        assert_eq!(compare(huge, "100000000000000000000"), Ordering::Less);
        assert_eq!(compare("1.99999999999999999999", "1.3"), Ordering::Greater);
        assert!(MigrationVersion::parse(huge).unwrap() > MigrationVersion::parse("2").unwrap());
    }

    #[test]
    fn test_compare_ignores_leading_zeros() {
        assert_eq!(compare("007", "7"), Ordering::Equal);
        assert_eq!(compare("1.010", "1.9"), Ordering::Greater);
        assert_eq!(MigrationVersion::parse("01.0").unwrap().key(), "1");
    }

    #[test]
    fn test_zero_version_key() {
        assert_eq!(MigrationVersion::tolerant("0.0").key(), "0");
    }
}
