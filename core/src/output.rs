//! Result persistence.
//!
//! Every invocation lands under `<group>/raw/<stage>/<invocation_id>` as
//! `.out`, `.err` and a small `.json` metadata record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::stage::StageResult;

/// Identifies one stage invocation inside a group directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: String,
    pub id: String,
}

impl Invocation {
    pub fn new(stage: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            id: id.into(),
        }
    }

    pub fn raw_dir(&self, group_dir: &Path) -> PathBuf {
        raw_dir(group_dir, &self.stage)
    }

    pub fn stdout_path(&self, group_dir: &Path) -> PathBuf {
        self.raw_dir(group_dir).join(format!("{}.out", self.id))
    }

    pub fn stderr_path(&self, group_dir: &Path) -> PathBuf {
        self.raw_dir(group_dir).join(format!("{}.err", self.id))
    }

    pub fn meta_path(&self, group_dir: &Path) -> PathBuf {
        self.raw_dir(group_dir).join(format!("{}.json", self.id))
    }
}

pub fn raw_dir(group_dir: &Path, stage: &str) -> PathBuf {
    group_dir.join("raw").join(stage)
}

/// Writes stage results somewhere durable. Called once per invocation.
pub trait ResultStore: Send + Sync {
    fn store(&self, group_dir: &Path, invocation: &Invocation, result: &StageResult)
    -> io::Result<()>;
}

#[derive(Serialize)]
struct ResultMeta<'a> {
    stage: &'a str,
    invocation_id: &'a str,
    exit: i32,
    stdout: String,
    stderr: String,
    has_error: bool,
}

/// Filesystem-backed [`ResultStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsResultStore;

impl ResultStore for FsResultStore {
    fn store(
        &self,
        group_dir: &Path,
        invocation: &Invocation,
        result: &StageResult,
    ) -> io::Result<()> {
        fs::create_dir_all(invocation.raw_dir(group_dir))?;

        let stdout_path: PathBuf = invocation.stdout_path(group_dir);
        let stderr_path: PathBuf = invocation.stderr_path(group_dir);
        write_capture(&stdout_path, &result.stdout)?;
        write_capture(&stderr_path, &result.stderr)?;

        let meta = ResultMeta {
            stage: &invocation.stage,
            invocation_id: &invocation.id,
            exit: result.exit_code,
            stdout: file_name(&stdout_path),
            stderr: file_name(&stderr_path),
            has_error: result.error.is_some(),
        };
        let json: Vec<u8> = serde_json::to_vec_pretty(&meta).map_err(io::Error::other)?;
        fs::write(invocation.meta_path(group_dir), json)
    }
}

/// An empty capture never replaces a file the stage already streamed into.
fn write_capture(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if bytes.is_empty() && fs::metadata(path).is_ok_and(|meta| meta.len() > 0) {
        return Ok(());
    }
    fs::write(path, bytes)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
