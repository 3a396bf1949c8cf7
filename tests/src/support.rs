use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainscan_common::config::{Config, StageConfig};
use chainscan_core::Runner;
use chainscan_core::output::{Invocation, ResultStore};
use chainscan_core::progress::{Captured, Console};
use chainscan_core::stage::{
    Stage, StageContext, StageFailure, StageRegistry, StageResult, StageTask,
};
use tokio::sync::Notify;

/// Fail-fast config with a 30s default deadline and a single slot.
pub fn config(output_dir: &Path, stages: Vec<StageConfig>) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        concurrency: 1,
        tool_timeout_sec: 30,
        debug: false,
        verbose: false,
        fail_fast: true,
        stages,
    }
}

/// Placeholder config entry; the registered mock decides what runs.
pub fn stage(name: &str) -> StageConfig {
    StageConfig::new(name, "/bin/true")
}

pub fn registry<I>(stages: I) -> StageRegistry
where
    I: IntoIterator<Item = Arc<dyn Stage>>,
{
    let mut registry = StageRegistry::new();
    for stage in stages {
        registry.register_arc(stage);
    }
    registry
}

/// Runner that renders into memory instead of stdout.
pub fn runner(cfg: Config, registry: StageRegistry) -> (Runner, Captured) {
    let (console, captured) = Console::capture(false);
    (Runner::new(cfg, registry).with_console(console), captured)
}

pub fn group_dir(output_dir: &Path, apex: &str) -> PathBuf {
    output_dir.join(apex.replace('.', "_"))
}

/// Files in `dir` with extension `ext`, sorted by name.
pub fn files_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|e| e == ext))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn entries(log: &Journal) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn write_sink(sink: &mut Option<chainscan_core::stage::OutputSink>, bytes: &[u8]) {
    if let Some(sink) = sink {
        sink.write_all(bytes).unwrap();
    }
}

/// Prints fixed stdout, like a discovery tool emitting hosts.
pub struct Emit {
    name: String,
    stdout: String,
}

impl Emit {
    pub fn new(name: &str, lines: &[&str]) -> Arc<dyn Stage> {
        let mut stdout: String = lines.join("\n");
        if !stdout.is_empty() {
            stdout.push('\n');
        }
        Arc::new(Self {
            name: name.to_string(),
            stdout,
        })
    }
}

#[async_trait]
impl Stage for Emit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, mut task: StageTask) -> StageResult {
        write_sink(&mut task.stdout, self.stdout.as_bytes());
        StageResult::success(self.stdout.clone())
    }
}

/// Expects exactly one argument naming a file and echoes its contents.
pub struct ReadTargets {
    name: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ReadTargets {
    pub fn new(name: &str) -> (Arc<dyn Stage>, Arc<Mutex<Vec<String>>>) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let stage: Arc<dyn Stage> = Arc::new(Self {
            name: name.to_string(),
            seen: seen.clone(),
        });
        (stage, seen)
    }
}

#[async_trait]
impl Stage for ReadTargets {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, task: StageTask) -> StageResult {
        self.seen.lock().unwrap().extend(task.args.iter().cloned());

        let [path] = task.args.as_slice() else {
            return StageResult::failed(1, StageFailure::Message("expected one argument".into()));
        };
        if !Path::new(path).is_absolute() {
            return StageResult::failed(1, StageFailure::Message(format!("relative path {path}")));
        }
        match fs::read(path) {
            Ok(bytes) => StageResult::success(bytes),
            Err(e) => StageResult::failed(1, StageFailure::Message(e.to_string())),
        }
    }
}

/// Appends `<name>:start` and `<name>:end` around an optional pause.
pub struct Recorder {
    name: String,
    log: Journal,
    pause: Duration,
}

impl Recorder {
    pub fn new(name: &str, log: &Journal, pause: Duration) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            pause,
        })
    }
}

#[async_trait]
impl Stage for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, _task: StageTask) -> StageResult {
        self.log.lock().unwrap().push(format!("{}:start", self.name));
        tokio::time::sleep(self.pause).await;
        self.log.lock().unwrap().push(format!("{}:end", self.name));
        StageResult::success("ok\n")
    }
}

/// Sleeps unless the context ends first.
pub struct Sleeper {
    name: String,
    sleep: Duration,
}

impl Sleeper {
    pub fn new(name: &str, sleep: Duration) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
            sleep,
        })
    }
}

#[async_trait]
impl Stage for Sleeper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: StageContext, _task: StageTask) -> StageResult {
        tokio::select! {
            _ = tokio::time::sleep(self.sleep) => StageResult::success("ok\n"),
            failure = ctx.done() => StageResult::failed(-1, failure),
        }
    }
}

/// Exits non-zero with a message on stderr.
pub struct Failing {
    name: String,
    code: i32,
}

impl Failing {
    pub fn new(name: &str, code: i32) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
            code,
        })
    }
}

#[async_trait]
impl Stage for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, mut task: StageTask) -> StageResult {
        write_sink(&mut task.stderr, b"boom\n");
        StageResult::failed(self.code, StageFailure::Exit(self.code)).with_stderr("boom\n")
    }
}

/// Signals `started`, then waits for `release` or the context.
pub struct Blocking {
    name: String,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl Blocking {
    pub fn new(name: &str, started: &Arc<Notify>, release: &Arc<Notify>) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
            started: started.clone(),
            release: release.clone(),
        })
    }
}

#[async_trait]
impl Stage for Blocking {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: StageContext, _task: StageTask) -> StageResult {
        self.started.notify_one();
        tokio::select! {
            _ = self.release.notified() => StageResult::success("ok\n"),
            failure = ctx.done() => StageResult::failed(-1, failure),
        }
    }
}

/// Streams a line into each sink, failing if either is missing.
pub struct Streaming {
    name: String,
}

impl Streaming {
    pub fn new(name: &str) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Stage for Streaming {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, task: StageTask) -> StageResult {
        let (Some(mut stdout), Some(mut stderr)) = (task.stdout, task.stderr) else {
            return StageResult::failed(1, StageFailure::Message("missing sinks".into()));
        };
        if let Err(e) = stdout
            .write_all(b"stdout-test\n")
            .and_then(|_| stderr.write_all(b"stderr-test\n"))
        {
            return StageResult::failed(1, StageFailure::Capture(e));
        }
        StageResult::success("stdout-test\n").with_stderr("stderr-test\n")
    }
}

/// Writes targets only to the streamed sink; the returned capture is empty.
pub struct StreamOnly {
    name: String,
    lines: Vec<String>,
}

impl StreamOnly {
    pub fn new(name: &str, lines: &[&str]) -> Arc<dyn Stage> {
        Arc::new(Self {
            name: name.to_string(),
            lines: lines.iter().map(|line| format!("{line}\n")).collect(),
        })
    }
}

#[async_trait]
impl Stage for StreamOnly {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: StageContext, mut task: StageTask) -> StageResult {
        for line in &self.lines {
            write_sink(&mut task.stdout, line.as_bytes());
        }
        StageResult::success(Vec::new())
    }
}

/// Store whose every write fails.
pub struct BrokenStore;

impl ResultStore for BrokenStore {
    fn store(
        &self,
        _group_dir: &Path,
        _invocation: &Invocation,
        _result: &StageResult,
    ) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}
