use std::fmt;
use std::io;
use std::path::PathBuf;

use chainscan_common::targets::TargetError;
use thiserror::Error;

use crate::stage::StageFailure;

/// One failure surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no targets found")]
    NoTargets,

    #[error("targets file not found: {}", .0.display())]
    TargetsFileNotFound(PathBuf),

    #[error(transparent)]
    Targets(TargetError),

    #[error("stage {0} not registered")]
    UnregisteredStage(String),

    #[error("[{group}] {stage} failed: {source}")]
    Stage {
        group: String,
        stage: String,
        #[source]
        source: StageFailure,
    },

    #[error("[{group}] {stage}: writing output: {source}")]
    Persist {
        group: String,
        stage: String,
        #[source]
        source: io::Error,
    },

    #[error("[{group}] {stage}: produced targets: {source}")]
    ProducedTargets {
        group: String,
        stage: String,
        #[source]
        source: TargetError,
    },

    #[error("[{group}] preparing workspace: {source}")]
    Workspace {
        group: String,
        #[source]
        source: io::Error,
    },

    #[error("interrupted")]
    Interrupted,
}

impl From<TargetError> for PipelineError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::NotFound(path) => PipelineError::TargetsFileNotFound(path),
            other => PipelineError::Targets(other),
        }
    }
}

/// Every error of a run, in the order they happened.
#[derive(Debug, Default)]
pub struct PipelineErrors(Vec<PipelineError>);

impl PipelineErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: PipelineError) {
        self.0.push(err);
    }

    pub fn first(&self) -> Option<&PipelineError> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<PipelineError> {
        self.0
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for PipelineErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<PipelineError> for PipelineErrors {
    fn from(err: PipelineError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for PipelineErrors {
    type Item = PipelineError;
    type IntoIter = std::vec::IntoIter<PipelineError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
