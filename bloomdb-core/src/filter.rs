//! Selection among filter variants of the same migration.
//!
//! A filter is the optional tag between the description and `.sql`
//! (`V1__init.postgres.sql`). Which variants survive depends on the mode:
//!
//! - `None` keeps only unfiltered files.
//! - `Hard(f)` keeps only files tagged `f`.
//! - `Soft(f)` picks, per migration identity, the `f` variant if present and
//!   the unfiltered file otherwise.

use std::collections::HashMap;

use serde::Serialize;

/// How filter variants are selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "filter", rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    None,
    Hard(String),
    Soft(String),
}

impl FilterMode {
    /// Build the mode from the hard and soft settings. Hard wins when both are set;
    /// blank values count as unset.
    pub fn from_settings(hard: Option<&str>, soft: Option<&str>) -> Self {
        let clean = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(h) = clean(hard) {
            return FilterMode::Hard(h);
        }
        if let Some(s) = clean(soft) {
            return FilterMode::Soft(s);
        }
        FilterMode::None
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterMode::None => write!(f, "none"),
            FilterMode::Hard(v) => write!(f, "hard({})", v),
            FilterMode::Soft(v) => write!(f, "soft({})", v),
        }
    }
}

/// Anything that carries a migration identity and an optional filter tag.
pub trait Filtered {
    /// Version for versioned migrations, description for repeatable ones.
    fn identity_key(&self) -> String;
    fn filter(&self) -> Option<&str>;
}

/// Apply a filter mode. Order of the input is preserved for `None` and `Hard`;
/// `Soft` yields one entry per identity in order of first appearance.
pub fn select<T: Filtered>(items: Vec<T>, mode: &FilterMode) -> Vec<T> {
    match mode {
        FilterMode::None => items.into_iter().filter(|m| m.filter().is_none()).collect(),
        FilterMode::Hard(wanted) => items
            .into_iter()
            .filter(|m| m.filter() == Some(wanted.as_str()))
            .collect(),
        FilterMode::Soft(wanted) => select_soft(items, wanted),
    }
}

fn select_soft<T: Filtered>(items: Vec<T>, wanted: &str) -> Vec<T> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        let key = item.identity_key();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(item);
    }

    let mut selected = Vec::with_capacity(order.len());
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        let pick = group
            .iter()
            .position(|m| m.filter() == Some(wanted))
            .or_else(|| group.iter().position(|m| m.filter().is_none()));
        if let Some(idx) = pick {
            selected.push(group.swap_remove(idx));
        }
    }
    selected
}
