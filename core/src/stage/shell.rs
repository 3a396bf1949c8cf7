//! Process-backed stage.
//!
//! Spawns the configured binary directly (no shell interpolation) in its own
//! process group, pipes stdout and stderr and keeps every chunk in the
//! in-memory capture while a blocking writer mirrors it into the task's sink.
//! On deadline or cancellation the whole group is killed, so tools that fork
//! helpers cannot keep the pipes open.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use super::{OutputSink, Stage, StageContext, StageFailure, StageResult, StageTask};

const READ_CHUNK: usize = 8 * 1024;
/// How long pipes may keep draining after a killed process.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

type Buffer = Arc<Mutex<Vec<u8>>>;

pub struct ShellStage {
    name: String,
    binary: PathBuf,
}

impl ShellStage {
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Stage for ShellStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: StageContext, task: StageTask) -> StageResult {
        let StageTask { args, stdout, stderr } = task;

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child: Child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return StageResult::failed(
                    -1,
                    StageFailure::Spawn {
                        binary: self.binary.display().to_string(),
                        source,
                    },
                );
            }
        };
        debug!(stage = %self.name, pid = ?child.id(), "spawned");

        let out_pipe: Pipe = Pipe::spawn(child.stdout.take(), stdout);
        let err_pipe: Pipe = Pipe::spawn(child.stderr.take(), stderr);

        let outcome: Result<io::Result<ExitStatus>, StageFailure> = tokio::select! {
            status = child.wait() => Ok(status),
            failure = ctx.done() => {
                terminate(&mut child, &self.name).await;
                Err(failure)
            }
        };

        let grace: Option<Duration> = outcome.is_err().then_some(DRAIN_GRACE);
        let ((stdout, out_err), (stderr, err_err)) =
            tokio::join!(out_pipe.drain(grace), err_pipe.drain(grace));

        let mut result = StageResult {
            stdout,
            stderr,
            exit_code: 0,
            error: None,
        };

        match outcome {
            Err(failure) => {
                result.exit_code = -1;
                result.error = Some(failure);
            }
            Ok(Err(e)) => {
                result.exit_code = -1;
                result.error = Some(StageFailure::Capture(e));
            }
            Ok(Ok(status)) => match status.code() {
                Some(0) => {}
                Some(code) => {
                    result.exit_code = code;
                    result.error = Some(StageFailure::Exit(code));
                }
                None => {
                    result.exit_code = -1;
                    result.error = Some(StageFailure::Signalled);
                }
            },
        }

        for e in [out_err, err_err].into_iter().flatten() {
            if let Some(primary) = &result.error {
                warn!(stage = %self.name, "capturing output after {primary}: {e}");
            } else {
                result.error = Some(StageFailure::Capture(e));
            }
        }

        result
    }
}

/// Kills the child's process group, then the child itself, and reaps it.
async fn terminate(child: &mut Child, stage: &str) {
    if let Err(e) = kill_group(child) {
        debug!(stage, "killing process group: {e}");
    }
    if let Err(e) = child.kill().await {
        warn!(stage, "failed to kill process: {e}");
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pgid: i32 = i32::try_from(pid).map_err(io::Error::other)?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL)?;
    Ok(())
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> io::Result<()> {
    Ok(())
}

/// One output pipe: an async reader filling the shared capture and an
/// optional blocking writer feeding the sink.
struct Pipe {
    captured: Buffer,
    reader: JoinHandle<Option<io::Error>>,
    writer: Option<JoinHandle<Option<io::Error>>>,
}

impl Pipe {
    fn spawn<R>(pipe: Option<R>, sink: Option<OutputSink>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured: Buffer = Buffer::default();
        let (chunks, writer) = match sink {
            Some(sink) => {
                let (tx, rx) = mpsc::channel::<Vec<u8>>();
                let writer = tokio::task::spawn_blocking(move || write_chunks(sink, rx));
                (Some(tx), Some(writer))
            }
            None => (None, None),
        };
        let reader = tokio::spawn(read_pipe(pipe, Arc::clone(&captured), chunks));

        Self {
            captured,
            reader,
            writer,
        }
    }

    /// Waits for the pipe to close, at most `grace` when set. Whatever was
    /// read so far is returned even when the reader had to be abandoned.
    async fn drain(self, grace: Option<Duration>) -> (Vec<u8>, Option<io::Error>) {
        let Pipe {
            captured,
            reader,
            writer,
        } = self;

        let abort = reader.abort_handle();
        let read_err: Option<io::Error> = match grace {
            None => join_error(reader.await),
            Some(grace) => match tokio::time::timeout(grace, reader).await {
                Ok(joined) => join_error(joined),
                Err(_) => {
                    abort.abort();
                    Some(io::Error::other("output pipe did not close"))
                }
            },
        };

        let write_err: Option<io::Error> = match writer {
            Some(writer) => join_error(writer.await),
            None => None,
        };

        let bytes: Vec<u8> = std::mem::take(
            &mut *captured.lock().unwrap_or_else(PoisonError::into_inner),
        );
        (bytes, read_err.or(write_err))
    }
}

fn join_error(joined: Result<Option<io::Error>, JoinError>) -> Option<io::Error> {
    joined.unwrap_or_else(|e| Some(io::Error::other(e)))
}

/// Reads `pipe` to the end into `captured`, forwarding every chunk to the
/// sink writer while it is still accepting.
async fn read_pipe<R>(
    pipe: Option<R>,
    captured: Buffer,
    mut chunks: Option<Sender<Vec<u8>>>,
) -> Option<io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut pipe = pipe?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n: usize = match pipe.read(&mut buf).await {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Some(e),
        };
        let chunk: &[u8] = &buf[..n];
        captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);

        let closed: bool = chunks
            .as_ref()
            .is_some_and(|tx| tx.send(chunk.to_vec()).is_err());
        if closed {
            chunks = None;
        }
    }
}

/// Blocking side of a pipe. Stops at the first sink error; the reader keeps
/// capturing regardless.
fn write_chunks(mut sink: OutputSink, chunks: Receiver<Vec<u8>>) -> Option<io::Error> {
    for chunk in chunks {
        if let Err(e) = sink.write_all(&chunk) {
            return Some(e);
        }
    }
    sink.flush().err()
}
