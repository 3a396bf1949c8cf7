//! The pipeline **orchestrator**.
//!
//! Targets are split into apex groups and every group runs the configured
//! stages in declared order. Each stage sees a fresh substitution of the
//! group's [`VarEnv`], runs under its own deadline and the run-wide
//! cancellation token, and has its result persisted through the
//! [`ResultStore`]. Target-producing stages fold their stdout into the
//! running targets file so later stages pick it up.
//!
//! **Execution model:** strictly sequential. The configured concurrency only
//! sizes a semaphore every invocation takes a permit from.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chainscan_common::config::{Config, StageConfig};
use chainscan_common::targets::{
    TargetError, group_by_apex, merge_with_file, normalize_bytes, normalize_file, read_targets,
    sanitize_dir_name,
};
use chrono::{DateTime, Local};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineErrors};
use crate::output::{FsResultStore, Invocation, ResultStore};
use crate::progress::{Console, EventLog, PrefixWriter, ProgressTable, time_prefix};
use crate::stage::{OutputSink, Stage, StageContext, StageRegistry, StageResult, StageTask};

pub mod command;
pub mod vars;

pub use command::{format_command, redact_args};
pub use vars::VarEnv;

use vars::{TARGETS_FILE, stderr_file_token, stdout_file_token, targets_file_token};

/// Drives a whole run.
pub struct Runner {
    cfg: Config,
    registry: StageRegistry,
    store: Arc<dyn ResultStore>,
    console: Console,
    slots: Arc<Semaphore>,
}

/// Whether the run goes on after a group or stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

impl Runner {
    pub fn new(cfg: Config, registry: StageRegistry) -> Self {
        let permits: usize = cfg.concurrency.clamp(1, Semaphore::MAX_PERMITS);
        let slots: Arc<Semaphore> = Arc::new(Semaphore::new(permits));
        Self {
            cfg,
            registry,
            store: Arc::new(FsResultStore),
            console: Console::stdout(),
            slots,
        }
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Runs every enabled stage for every apex group of `target_arg`.
    ///
    /// `target_arg` is a targets file, a URL or a single host. Without
    /// fail-fast all errors are collected and returned together at the end;
    /// with fail-fast the first error cancels everything and returns at once.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        target_arg: &str,
    ) -> Result<(), PipelineErrors> {
        let targets: Vec<String> = read_targets(target_arg).map_err(PipelineError::from)?;
        if targets.is_empty() {
            return Err(PipelineError::NoTargets.into());
        }

        if let Some(missing) = self
            .cfg
            .enabled_stages()
            .find(|stage| !self.registry.contains(&stage.name))
        {
            return Err(PipelineError::UnregisteredStage(missing.name.clone()).into());
        }

        let run_token: CancellationToken = cancel.child_token();
        let groups = group_by_apex(targets);
        debug!(groups = groups.len(), "starting run");

        let mut errors = PipelineErrors::new();
        for (apex, group_targets) in &groups {
            if run_token.is_cancelled() {
                errors.push(PipelineError::Interrupted);
                break;
            }
            if self.run_group(&run_token, apex, group_targets, &mut errors).await == Flow::Abort {
                break;
            }
        }

        errors.into_result()
    }

    async fn run_group(
        &self,
        run_token: &CancellationToken,
        apex: &str,
        targets: &[String],
        errors: &mut PipelineErrors,
    ) -> Flow {
        let group_dir: PathBuf = self.cfg.output_dir.join(sanitize_dir_name(apex));
        let input_dir: PathBuf = group_dir.join("input");
        let base_targets: PathBuf = input_dir.join("targets.txt");

        if let Err(source) = prepare_workspace(&input_dir, &base_targets, targets) {
            errors.push(PipelineError::Workspace {
                group: apex.to_string(),
                source,
            });
            return self.after_failure(run_token);
        }
        debug!(group = apex, dir = %group_dir.display(), targets = targets.len(), "group ready");

        let mut vars = VarEnv::for_group(
            &base_targets,
            &group_dir,
            self.cfg.stages.iter().map(|stage| stage.name.as_str()),
        );
        let mut view = View::open(&self.console, &self.cfg, apex, &group_dir, &base_targets);

        let mut group = Group {
            apex,
            dir: &group_dir,
            input_dir: &input_dir,
            current_targets: base_targets.clone(),
        };

        for (row, stage_cfg) in self.cfg.stages.iter().enumerate() {
            if !stage_cfg.is_enabled() {
                continue;
            }
            if run_token.is_cancelled() {
                errors.push(PipelineError::Interrupted);
                view.close();
                return Flow::Abort;
            }

            let Some(stage) = self.registry.get(&stage_cfg.name) else {
                errors.push(PipelineError::UnregisteredStage(stage_cfg.name.clone()));
                continue;
            };

            let outcome: Result<(), PipelineError> = self
                .run_stage(run_token, &mut group, &mut vars, &view, row, stage_cfg, stage)
                .await;

            if let Err(err) = outcome {
                warn!("{err}");
                errors.push(err);
                if self.cfg.fail_fast {
                    run_token.cancel();
                    view.close();
                    return Flow::Abort;
                }
            }
        }

        view.close();
        Flow::Continue
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        run_token: &CancellationToken,
        group: &mut Group<'_>,
        vars: &mut VarEnv,
        view: &View,
        row: usize,
        stage_cfg: &StageConfig,
        stage: Arc<dyn Stage>,
    ) -> Result<(), PipelineError> {
        let name: &str = &stage_cfg.name;
        vars.set_path(TARGETS_FILE, &group.current_targets);
        vars.set_path(targets_file_token(name), &group.current_targets);
        let args: Vec<String> = vars.substitute(&stage_cfg.flags);
        let timeout: Option<Duration> =
            effective_timeout(stage_cfg.timeout_sec, self.cfg.tool_timeout_sec);

        let invocation = Invocation::new(name, invocation_id(name, Local::now()));
        let stdout_path: PathBuf = invocation.stdout_path(group.dir);
        let stderr_path: PathBuf = invocation.stderr_path(group.dir);
        let persist_err = |source: io::Error| PipelineError::Persist {
            group: group.apex.to_string(),
            stage: name.to_string(),
            source,
        };

        fs::create_dir_all(invocation.raw_dir(group.dir)).map_err(persist_err)?;
        let stdout_file: File = File::create(&stdout_path).map_err(persist_err)?;
        let stderr_file: File = File::create(&stderr_path).map_err(persist_err)?;
        vars.set_path(stdout_file_token(name), &stdout_path);
        vars.set_path(stderr_file_token(name), &stderr_path);

        let mut streams: Vec<PrefixWriter<Console>> = Vec::new();
        let task: StageTask = if self.cfg.verbose {
            let out = PrefixWriter::new(self.console.clone(), time_prefix(group.apex, name, "stdout"));
            let err = PrefixWriter::new(self.console.clone(), time_prefix(group.apex, name, "stderr"));
            streams.push(out.clone());
            streams.push(err.clone());
            StageTask::new(args.clone()).with_sinks(
                Box::new(Tee::new(stdout_file, out)),
                Box::new(Tee::new(stderr_file, err)),
            )
        } else {
            let stdout_sink: OutputSink = Box::new(stdout_file);
            let stderr_sink: OutputSink = Box::new(stderr_file);
            StageTask::new(args.clone()).with_sinks(stdout_sink, stderr_sink)
        };

        let command: String = format_command(&stage_cfg.binary, &redact_args(&args));
        view.start(row, name, timeout, &command);
        debug!(group = group.apex, stage = name, ?timeout, "stage starting");

        let started: Instant = Instant::now();
        let mut result: StageResult = {
            let _permit = self.slots.acquire().await.ok();
            let ctx = StageContext::new(run_token.child_token(), timeout);
            stage.run(ctx, task).await
        };
        let dur: Duration = started.elapsed();

        for stream in &streams {
            if let Err(e) = stream.finish() {
                warn!(stage = name, "flushing live output: {e}");
            }
        }

        if let Err(source) = self.store.store(group.dir, &invocation, &result) {
            view.fail(row, name, result.exit_code, dur, Some(&source));
            return Err(persist_err(source));
        }

        if let Some(failure) = result.error.take() {
            view.fail(row, name, result.exit_code, dur, Some(&failure));
            return Err(PipelineError::Stage {
                group: group.apex.to_string(),
                stage: name.to_string(),
                source: failure,
            });
        }

        view.done(row, name, result.exit_code, dur);
        debug!(group = group.apex, stage = name, exit = result.exit_code, "stage finished");

        if stage_cfg.produces_targets && result.exit_code == 0 {
            let derived: PathBuf = self
                .merge_produced(group, name, &result.stdout, &stdout_path)
                .map_err(|source| {
                    view.error(name, &source);
                    PipelineError::ProducedTargets {
                        group: group.apex.to_string(),
                        stage: name.to_string(),
                        source,
                    }
                })?;

            vars.set_path(targets_file_token(name), &derived);
            view.info(name, "targets", &derived);
            group.current_targets = derived;
        }

        Ok(())
    }

    /// Normalizes a producer's stdout, merges it into the current targets
    /// and writes `input/targets.<stage>.txt`.
    fn merge_produced(
        &self,
        group: &Group<'_>,
        stage: &str,
        stdout: &[u8],
        stdout_path: &Path,
    ) -> Result<PathBuf, TargetError> {
        let produced: Vec<String> =
            normalize_bytes(stdout).or_else(|_| normalize_file(stdout_path))?;
        let merged: Vec<String> = merge_with_file(Some(&group.current_targets), &produced);

        let derived: PathBuf = group
            .input_dir
            .join(format!("targets.{}.txt", sanitize_dir_name(stage)));
        write_lines(&derived, &merged).map_err(|source| TargetError::Io {
            path: derived.clone(),
            source,
        })?;
        debug!(group = group.apex, stage, count = merged.len(), "targets merged");
        Ok(derived)
    }

    fn after_failure(&self, run_token: &CancellationToken) -> Flow {
        if self.cfg.fail_fast {
            run_token.cancel();
            Flow::Abort
        } else {
            Flow::Continue
        }
    }
}

/// Per-group state threaded through the stage loop.
struct Group<'a> {
    apex: &'a str,
    dir: &'a Path,
    input_dir: &'a Path,
    current_targets: PathBuf,
}

/// Per-stage override if set, run-wide default otherwise. `0` means no
/// deadline.
pub fn effective_timeout(stage_override: Option<u64>, default_sec: u64) -> Option<Duration> {
    let secs: u64 = stage_override.unwrap_or(default_sec);
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// `<stage>-<YYYYMMDDTHHMMSS.nnnnnnnnn>`
pub fn invocation_id(stage: &str, at: DateTime<Local>) -> String {
    format!("{stage}-{}", at.format("%Y%m%dT%H%M%S%.9f"))
}

fn prepare_workspace(input_dir: &Path, base_targets: &Path, targets: &[String]) -> io::Result<()> {
    fs::create_dir_all(input_dir)?;
    write_lines(base_targets, targets)?;
    if let Ok(normalized) = normalize_file(base_targets) {
        write_lines(base_targets, &normalized)?;
    }
    Ok(())
}

fn write_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let mut content: String = lines.join("\n");
    content.push('\n');
    fs::write(path, content)
}

/// Writes everything to the capture file and mirrors it to live output.
struct Tee<A, B> {
    primary: A,
    mirror: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    fn new(primary: A, mirror: B) -> Self {
        Self { primary, mirror }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        self.mirror.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        self.mirror.flush()
    }
}

/// Where a group's progress goes: the live table, or event lines in
/// verbose mode.
struct View {
    kind: ViewKind,
}

enum ViewKind {
    Table(Option<ProgressTable>),
    Events(EventLog),
}

impl View {
    fn open(console: &Console, cfg: &Config, apex: &str, group_dir: &Path, base: &Path) -> Self {
        let names: Vec<&str> = cfg.stages.iter().map(|s| s.name.as_str()).collect();

        let kind = if cfg.verbose {
            let log = EventLog::new(console.clone(), apex);
            log.info("-", "dir", &group_dir.display().to_string());
            log.info("-", "targets", &base.display().to_string());
            log.header();
            for stage in &cfg.stages {
                if stage.is_enabled() {
                    log.queued(&stage.name);
                } else {
                    log.skipped(&stage.name);
                }
            }
            ViewKind::Events(log)
        } else {
            let mut table = ProgressTable::new(console.clone(), apex, &names);
            if let Err(e) = table.print() {
                warn!("drawing progress table: {e}");
            }
            for (row, stage) in cfg.stages.iter().enumerate() {
                if !stage.is_enabled() {
                    table.mark_skipped(row);
                }
            }
            ViewKind::Table(Some(table))
        };

        Self { kind }
    }

    fn start(&self, row: usize, name: &str, timeout: Option<Duration>, command: &str) {
        match &self.kind {
            ViewKind::Table(Some(table)) => table.mark_start(row),
            ViewKind::Table(None) => {}
            ViewKind::Events(log) => {
                log.start(name);
                log.timeout(name, timeout);
                log.command(name, command);
            }
        }
    }

    fn done(&self, row: usize, name: &str, exit: i32, dur: Duration) {
        match &self.kind {
            ViewKind::Table(Some(table)) => table.mark_done(row, exit, dur),
            ViewKind::Table(None) => {}
            ViewKind::Events(log) => log.done(name, dur, exit),
        }
    }

    fn fail(
        &self,
        row: usize,
        name: &str,
        exit: i32,
        dur: Duration,
        error: Option<&dyn std::fmt::Display>,
    ) {
        match &self.kind {
            ViewKind::Table(Some(table)) => table.mark_fail(row, exit, dur),
            ViewKind::Table(None) => {}
            ViewKind::Events(log) => {
                log.fail(name, dur, exit);
                if let Some(error) = error {
                    log.error(name, error);
                }
            }
        }
    }

    fn error(&self, name: &str, error: &dyn std::fmt::Display) {
        if let ViewKind::Events(log) = &self.kind {
            log.error(name, error);
        }
    }

    fn info(&self, name: &str, key: &str, path: &Path) {
        if let ViewKind::Events(log) = &self.kind {
            log.info(name, key, &path.display().to_string());
        }
    }

    /// Ends the table; idempotent.
    fn close(&mut self) {
        if let ViewKind::Table(table) = &mut self.kind
            && let Some(table) = table.take()
            && let Err(e) = table.close()
        {
            warn!("closing progress table: {e}");
        }
    }
}
