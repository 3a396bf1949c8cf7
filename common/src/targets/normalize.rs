//! Target list canonicalization.
//!
//! A normalized list is sorted, free of duplicates and every entry is
//! lowercase with no `http(s)://` scheme and no trailing slash. Normalizing a
//! normalized list returns it unchanged.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use super::TargetError;

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Canonicalizes a single line, `None` for blanks and comments.
pub fn normalize_target(line: &str) -> Option<String> {
    let mut current: String = line.trim().to_lowercase();
    if current.starts_with('#') {
        return None;
    }

    loop {
        let mut next: &str = current.as_str();
        for scheme in SCHEMES {
            next = next.strip_prefix(scheme).unwrap_or(next);
        }
        let next: &str = next.trim_end_matches('/').trim();
        if next == current {
            break;
        }
        current = next.to_string();
    }

    if current.is_empty() || current.starts_with('#') {
        return None;
    }
    Some(current)
}

/// Normalizes a sequence of raw lines.
///
/// Fails with [`TargetError::EmptyResult`] when nothing survives, callers
/// treat that as an error rather than "no new targets".
pub fn normalize_lines<I, S>(lines: I) -> Result<Vec<String>, TargetError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let targets: BTreeSet<String> = lines
        .into_iter()
        .filter_map(|line| normalize_target(line.as_ref()))
        .collect();

    if targets.is_empty() {
        return Err(TargetError::EmptyResult);
    }
    Ok(targets.into_iter().collect())
}

pub fn normalize_bytes(bytes: &[u8]) -> Result<Vec<String>, TargetError> {
    let text = String::from_utf8_lossy(bytes);
    normalize_lines(text.split('\n'))
}

pub fn normalize_file(path: &Path) -> Result<Vec<String>, TargetError> {
    let bytes: Vec<u8> = fs::read(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    normalize_bytes(&bytes)
}

/// Union of `existing` and `new`, existing entries taking precedence, with
/// the result deduplicated and sorted again.
pub fn merge(existing: &[String], new: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(existing.len() + new.len());
    let mut out: Vec<String> = Vec::with_capacity(existing.len() + new.len());

    for target in existing.iter().chain(new) {
        if target.is_empty() || !seen.insert(target.as_str()) {
            continue;
        }
        out.push(target.clone());
    }

    out.sort();
    out
}

/// Merges `new` into the normalized contents of the targets file at
/// `current`. An unreadable or empty current file contributes nothing.
pub fn merge_with_file(current: Option<&Path>, new: &[String]) -> Vec<String> {
    let existing: Vec<String> = current
        .and_then(|path| normalize_file(path).ok())
        .unwrap_or_default();
    merge(&existing, new)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
