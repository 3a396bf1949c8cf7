//! The **abstraction** for a single pipeline stage.
//!
//! A stage is one external tool invocation. The orchestrator only ever talks
//! to the [`Stage`] trait: it hands over resolved arguments and two live
//! sinks, and receives a [`StageResult`] once the tool is done, timed out or
//! was cancelled. [`shell`] holds the process-backed implementation, the
//! [`registry`] maps configured names to executors.

use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod registry;
pub mod shell;

pub use registry::StageRegistry;
pub use shell::ShellStage;

/// Byte sink a stage streams its output into while it runs.
pub type OutputSink = Box<dyn Write + Send>;

/// Executes one stage invocation.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name the stage is registered under.
    fn name(&self) -> &str;

    /// Runs the stage to completion.
    ///
    /// Implementations must return promptly once [`StageContext::done`]
    /// resolves, stream output into the task's sinks as it is produced and
    /// always return the complete captured bytes in the result.
    async fn run(&self, ctx: StageContext, task: StageTask) -> StageResult;
}

/// Cancellation and deadline for one invocation.
#[derive(Clone, Debug)]
pub struct StageContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl StageContext {
    /// `timeout` of `None` means no deadline; the stage still observes
    /// `cancel`.
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled or the deadline passes, returning
    /// the matching failure. Pending forever when neither can happen.
    pub async fn done(&self) -> StageFailure {
        let deadline = async {
            match (self.deadline, self.timeout) {
                (Some(at), Some(timeout)) => {
                    tokio::time::sleep_until(at).await;
                    timeout
                }
                _ => std::future::pending::<Duration>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => StageFailure::Cancelled,
            timeout = deadline => StageFailure::TimedOut(timeout),
        }
    }
}

/// Input for one invocation.
pub struct StageTask {
    pub args: Vec<String>,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
}

impl StageTask {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_sinks(mut self, stdout: OutputSink, stderr: OutputSink) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }
}

#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("spawning {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("exit status {0}")]
    Exit(i32),

    #[error("terminated by signal")]
    Signalled,

    #[error("deadline of {}s exceeded", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("capturing output: {0}")]
    Capture(#[source] io::Error),

    #[error("{0}")]
    Message(String),
}

/// Outcome of exactly one invocation.
#[derive(Debug, Default)]
pub struct StageResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub error: Option<StageFailure>,
}

impl StageResult {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, error: StageFailure) -> Self {
        Self {
            exit_code,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}
