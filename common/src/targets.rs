//! # Scan Target Handling
//!
//! Everything that turns user supplied target strings into the artifacts the
//! pipeline consumes:
//!
//! * [`input`] reads the `--targets` argument (file path, URL or bare host).
//! * [`normalize`] canonicalizes target lists and merges them.
//! * [`apex`] partitions targets by apex domain and names group directories.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod apex;
pub mod input;
pub mod normalize;

pub use apex::{apex_domain, extract_host, group_by_apex, sanitize_dir_name};
pub use input::{looks_like_file_path, read_targets};
pub use normalize::{merge, merge_with_file, normalize_bytes, normalize_file, normalize_lines};

#[derive(Debug, Error)]
pub enum TargetError {
    /// Normalization removed every line.
    #[error("produced targets file is empty")]
    EmptyResult,

    #[error("empty target")]
    EmptyInput,

    #[error("targets file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("targets path is a directory: {}", .0.display())]
    IsDirectory(PathBuf),

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
