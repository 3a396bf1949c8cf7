use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::TargetError;

const LIST_EXTENSIONS: [&str; 3] = [".txt", ".list", ".lst"];

/// Resolves the `--targets` argument into raw target strings.
///
/// Supported forms:
/// * **File**: an existing file with one target per line (blank lines skipped).
/// * **URL**: anything containing `://` that is not an existing path.
/// * **Host**: any other string that does not look like a file path.
///
/// A string that looks like a path but does not exist is an error rather than
/// a hostname, so typos in `-t targets.txt` are not scanned as domains.
pub fn read_targets(path_or_single: &str) -> Result<Vec<String>, TargetError> {
    let s: &str = path_or_single.trim();
    if s.is_empty() {
        return Err(TargetError::EmptyInput);
    }

    let path: &Path = Path::new(s);
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(TargetError::IsDirectory(path.to_path_buf())),
        Ok(_) => read_target_file(path),
        Err(e) if e.kind() != ErrorKind::NotFound => Err(TargetError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        Err(_) if s.contains("://") => Ok(vec![s.to_string()]),
        Err(_) if looks_like_file_path(s) => Err(TargetError::NotFound(PathBuf::from(s))),
        Err(_) => Ok(vec![s.to_string()]),
    }
}

/// Heuristic for "the user meant a file": home-relative, contains a path
/// separator or carries a list-like extension.
pub fn looks_like_file_path(s: &str) -> bool {
    let s: &str = s.trim();
    if s.is_empty() {
        return false;
    }
    if s == "~" || s.starts_with("~/") {
        return true;
    }
    if s.contains(['/', '\\']) {
        return true;
    }

    let lower: String = s.to_ascii_lowercase();
    LIST_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn read_target_file(path: &Path) -> Result<Vec<String>, TargetError> {
    let content: String = fs::read_to_string(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let targets: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    debug!("read {} targets from {}", targets.len(), path.display());
    Ok(targets)
}
