//! Post-migration script: `${key}` substitution and execution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::db::{Dialect, Storage};
use crate::error::{BloomError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Values available to the script as `bloomdb:*` placeholders.
#[derive(Debug, Clone)]
pub struct ScriptContext<'a> {
    pub table: &'a str,
    pub dialect: Dialect,
    pub directory: &'a Path,
    /// Migrations applied by the run that precedes the script.
    pub applied: usize,
}

impl ScriptContext<'_> {
    fn builtins(&self) -> [(&'static str, String); 5] {
        [
            ("bloomdb:table", self.table.to_string()),
            ("bloomdb:dialect", self.dialect.to_string()),
            ("bloomdb:directory", self.directory.display().to_string()),
            (
                "bloomdb:timestamp",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            ("bloomdb:applied", self.applied.to_string()),
        ]
    }
}

/// User placeholders with the built-ins layered on top. Keys are lowercase.
pub fn placeholder_map(
    user: &HashMap<String, String>,
    ctx: &ScriptContext<'_>,
) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = user
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();
    for (key, value) in ctx.builtins() {
        map.insert(key.to_string(), value);
    }
    map
}

/// Replace every `${key}` outside dollar-quoted bodies. Keys match
/// case-insensitively; an unknown key is an error.
pub fn substitute(sql: &str, placeholders: &HashMap<String, String>) -> Result<String> {
    let lookup: HashMap<String, &str> = placeholders
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    let skipped = dollar_quoted_spans(sql);

    let mut out = String::with_capacity(sql.len());
    let mut copied_to = 0;
    for caps in PLACEHOLDER_RE.captures_iter(sql) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if skipped
            .iter()
            .any(|&(start, end)| whole.start() >= start && whole.end() <= end)
        {
            continue;
        }

        let Some(value) = lookup.get(&key.as_str().to_lowercase()) else {
            let mut available: Vec<&str> = placeholders.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(BloomError::PlaceholderNotFound {
                key: key.as_str().to_string(),
                available: if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                },
            });
        };

        out.push_str(&sql[copied_to..whole.start()]);
        out.push_str(value);
        copied_to = whole.end();
    }
    out.push_str(&sql[copied_to..]);
    Ok(out)
}

/// Byte spans of `$tag$ ... $tag$` bodies. Quoted strings and comments are
/// skipped so a `$` inside them does not open a span.
fn dollar_quoted_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"'") {
            i = skip_string_literal(bytes, i + 1);
        } else if rest.starts_with(b"--") {
            i += rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        } else if rest.starts_with(b"/*") {
            i += find(rest, b"*/").map_or(rest.len(), |p| p + 2);
        } else if rest.starts_with(b"$") {
            let tag_len = rest[1..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                .count();
            if rest.get(tag_len + 1) != Some(&b'$') {
                i += 1;
                continue;
            }
            let tag = &rest[..tag_len + 2];
            let body_start = i + tag.len();
            match find(&bytes[body_start..], tag) {
                Some(p) => {
                    let end = body_start + p + tag.len();
                    spans.push((i, end));
                    i = end;
                }
                None => i = bytes.len(),
            }
        } else {
            i += 1;
        }
    }
    spans
}

/// Index just past the closing quote; `''` is an escaped quote.
fn skip_string_literal(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read, render and execute the post-migration script.
pub async fn run_post_migration(
    storage: &dyn Storage,
    script: &Path,
    user_placeholders: &HashMap<String, String>,
    ctx: &ScriptContext<'_>,
) -> Result<()> {
    let name = script.display().to_string();
    let fail = |reason: String| BloomError::PostMigrationFailed {
        script: name.clone(),
        reason,
    };

    let raw = std::fs::read_to_string(script).map_err(|e| fail(e.to_string()))?;
    let sql = substitute(&raw, &placeholder_map(user_placeholders, ctx)).map_err(|e| fail(e.to_string()))?;

    log::info!(
        "Running post-migration script; script={}, table={}",
        name,
        ctx.table
    );
    storage
        .execute_migration(&sql)
        .await
        .map_err(|e| fail(e.to_string()))
}
