//! Live, self-repainting stage table.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ CHAINSCAN                             v0.1.0 │
//! │ Target: example.com                 Stages: 2 │
//! ├──────────────────────────────────────────────┤
//! │ START        TOOL           STATUS       ... │
//! ├──────────────────────────────────────────────┤
//! │ 10:01:02.345 subfinder      success      ... │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! On a terminal each row is rewritten in place and a ticker thread keeps
//! the running row's spinner and duration fresh. Anywhere else every status
//! change is appended as a new line.

use std::io::{self, Write};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use colored::*;
use console::{Alignment, pad_str};
use crossterm::cursor::{MoveDown, MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use tracing::warn;

use super::console::Console;
use super::format_duration;

const TICK: Duration = Duration::from_millis(120);
const MAX_WIDTH: usize = 78;
const MIN_WIDTH: usize = 20;
/// Lines above the first row: top, title, meta, separator, header, separator.
const HEAD_LINES: usize = 6;
const SPIN_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const COLUMNS: [(&str, usize); 5] = [
    ("START", 12),
    ("TOOL", 14),
    ("STATUS", 12),
    ("DURATION", 10),
    ("EXIT", 4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Queued,
    Running,
    Success,
    Fail,
    Skipped,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Queued => "queued",
            RowStatus::Running => "running",
            RowStatus::Success => "success",
            RowStatus::Fail => "fail",
            RowStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
struct Row {
    tool: String,
    status: RowStatus,
    stamp: Option<DateTime<Local>>,
    started: Option<Instant>,
    dur: Duration,
    exit: i32,
    spin: usize,
}

impl Row {
    fn queued(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            status: RowStatus::Queued,
            stamp: None,
            started: None,
            dur: Duration::ZERO,
            exit: 0,
            spin: 0,
        }
    }
}

struct TableState {
    console: Console,
    apex: String,
    rows: Vec<Row>,
    width: usize,
    printed: usize,
    spin_idx: usize,
}

/// One table per apex group. Rows are only changed through the `mark_*`
/// methods, which ignore out-of-range indices and illegal transitions.
pub struct ProgressTable {
    state: Arc<Mutex<TableState>>,
    ticker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl ProgressTable {
    pub fn new<S: AsRef<str>>(console: Console, apex: &str, tools: &[S]) -> Self {
        let width: usize = match console.width() {
            Some(cols) if console.is_term() => cols.saturating_sub(4).clamp(MIN_WIDTH, MAX_WIDTH),
            _ => MAX_WIDTH,
        };

        Self {
            state: Arc::new(Mutex::new(TableState {
                console,
                apex: apex.to_string(),
                rows: tools.iter().map(|t| Row::queued(t.as_ref())).collect(),
                width,
                printed: 0,
                spin_idx: 0,
            })),
            ticker: None,
        }
    }

    /// Draws the whole table and, on a terminal, starts the ticker.
    pub fn print(&mut self) -> io::Result<()> {
        {
            let mut state = lock(&self.state);
            let mut lines: Vec<String> = vec![
                state.top(),
                state.title_line(),
                state.meta_line(),
                state.sep(),
                state.header_line(),
                state.sep(),
            ];
            lines.extend((0..state.rows.len()).map(|i| state.row_line(i)));
            lines.push(state.bottom());

            let mut out: String = lines.join("\n");
            out.push('\n');
            state.console.emit(out.as_bytes())?;
            state.printed = HEAD_LINES + 1 + state.rows.len();
        }

        if lock(&self.state).console.is_term() && self.ticker.is_none() {
            self.ticker = Some(spawn_ticker(Arc::clone(&self.state)));
        }
        Ok(())
    }

    pub fn mark_start(&self, i: usize) {
        self.transition(i, &[RowStatus::Queued], |row| {
            row.status = RowStatus::Running;
            row.stamp = Some(Local::now());
            row.started = Some(Instant::now());
            row.dur = Duration::ZERO;
            row.exit = 0;
        });
    }

    /// Success for a zero exit code, failure otherwise.
    pub fn mark_done(&self, i: usize, exit: i32, dur: Duration) {
        self.transition(i, &[RowStatus::Running], |row| {
            row.status = if exit == 0 {
                RowStatus::Success
            } else {
                RowStatus::Fail
            };
            row.dur = dur;
            row.exit = exit;
        });
    }

    pub fn mark_fail(&self, i: usize, exit: i32, dur: Duration) {
        self.transition(i, &[RowStatus::Running], |row| {
            row.status = RowStatus::Fail;
            row.dur = dur;
            row.exit = exit;
        });
    }

    pub fn mark_skipped(&self, i: usize) {
        self.transition(i, &[RowStatus::Queued], |row| {
            row.status = RowStatus::Skipped;
            row.stamp = Some(Local::now());
            row.started = None;
            row.dur = Duration::ZERO;
            row.exit = 0;
        });
    }

    pub fn status(&self, i: usize) -> Option<RowStatus> {
        lock(&self.state).rows.get(i).map(|row| row.status)
    }

    /// Stops the ticker, waits for it, then ends the table with a blank line.
    pub fn close(mut self) -> io::Result<()> {
        self.stop_ticker();
        lock(&self.state).console.line("")
    }

    fn transition<F>(&self, i: usize, from: &[RowStatus], apply: F)
    where
        F: FnOnce(&mut Row),
    {
        let mut state = lock(&self.state);
        let Some(row) = state.rows.get_mut(i) else {
            return;
        };
        if !from.contains(&row.status) {
            return;
        }
        apply(row);
        if let Err(e) = state.update_line(i) {
            warn!("progress table redraw failed: {e}");
        }
    }

    fn stop_ticker(&mut self) {
        if let Some((tx, handle)) = self.ticker.take() {
            drop(tx);
            if handle.join().is_err() {
                warn!("progress ticker panicked");
            }
        }
    }
}

impl Drop for ProgressTable {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn lock(state: &Mutex<TableState>) -> MutexGuard<'_, TableState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_ticker(state: Arc<Mutex<TableState>>) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            match rx.recv_timeout(TICK) {
                Err(RecvTimeoutError::Timeout) => lock(&state).tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });
    (tx, handle)
}

impl TableState {
    /// Advances the next running row, round-robin.
    fn tick(&mut self) {
        let n: usize = self.rows.len();
        if n == 0 {
            return;
        }

        let found: Option<usize> = (0..n)
            .map(|off| (self.spin_idx + off) % n)
            .find(|&i| self.rows[i].status == RowStatus::Running && self.rows[i].started.is_some());

        if let Some(i) = found {
            self.spin_idx = (i + 1) % n;
            let row: &mut Row = &mut self.rows[i];
            row.spin = (row.spin + 1) % SPIN_FRAMES.len();
            if let Some(started) = row.started {
                row.dur = started.elapsed();
            }
            if let Err(e) = self.update_line(i) {
                warn!("progress table redraw failed: {e}");
            }
        }
    }

    fn update_line(&mut self, i: usize) -> io::Result<()> {
        let line: String = self.row_line(i);
        if !self.console.is_term() {
            return self.console.line(&line);
        }
        if self.printed == 0 {
            return Ok(());
        }

        let line_no: usize = HEAD_LINES + 1 + i;
        let up: usize = (self.printed + 1).saturating_sub(line_no);
        let mut buf: Vec<u8> = Vec::new();
        if up == 0 {
            buf.push(b'\r');
            queue!(buf, Clear(ClearType::CurrentLine))?;
            write!(buf, "{line}\r")?;
        } else {
            let up: u16 = u16::try_from(up).unwrap_or(u16::MAX);
            queue!(buf, MoveUp(up), MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            write!(buf, "{line}")?;
            queue!(buf, MoveDown(up), MoveToColumn(0))?;
        }
        self.console.emit(&buf)
    }

    fn top(&self) -> String {
        format!("┌{}┐", "─".repeat(self.width + 2))
    }

    fn sep(&self) -> String {
        format!("├{}┤", "─".repeat(self.width + 2))
    }

    fn bottom(&self) -> String {
        format!("└{}┘", "─".repeat(self.width + 2))
    }

    fn title_line(&self) -> String {
        let left: String = if self.console.is_term() {
            "CHAINSCAN".bright_green().bold().to_string()
        } else {
            "CHAINSCAN".to_string()
        };
        let right: String = format!("v{}", env!("CARGO_PKG_VERSION"));
        self.box_line(&two_cols(&left, &right, self.width))
    }

    fn meta_line(&self) -> String {
        let left: String = format!("Target: {}", self.apex);
        let right: String = format!("Stages: {}", self.rows.len());
        self.box_line(&two_cols(&left, &right, self.width))
    }

    fn header_line(&self) -> String {
        let cells: Vec<String> = COLUMNS.iter().map(|(name, _)| name.to_string()).collect();
        self.box_line(&join_cols(&cells))
    }

    fn row_line(&self, i: usize) -> String {
        let row: &Row = &self.rows[i];

        let start: String = row
            .stamp
            .map(|at| at.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_default();

        let (dur, exit): (String, String) = match row.status {
            RowStatus::Queued => ("-".into(), "-".into()),
            RowStatus::Running => {
                let elapsed: Duration = row.started.map(|s| s.elapsed()).unwrap_or(row.dur);
                (format_duration(elapsed), "-".into())
            }
            RowStatus::Success | RowStatus::Fail => (format_duration(row.dur), row.exit.to_string()),
            RowStatus::Skipped => (format_duration(Duration::ZERO), "0".into()),
        };

        let mut status: String = row.status.as_str().to_string();
        if self.console.is_term() {
            if row.status == RowStatus::Running {
                status = format!("{} {}", SPIN_FRAMES[row.spin], status);
            }
            let padded: String = pad_str(&status, COLUMNS[2].1, Alignment::Left, Some("…")).into_owned();
            status = match row.status {
                RowStatus::Queued => padded.bright_black().to_string(),
                RowStatus::Running => padded.cyan().to_string(),
                RowStatus::Success => padded.green().to_string(),
                RowStatus::Fail => padded.red().bold().to_string(),
                RowStatus::Skipped => padded.yellow().to_string(),
            };
        }

        self.box_line(&join_cols(&[start, row.tool.clone(), status, dur, exit]))
    }

    fn box_line(&self, content: &str) -> String {
        format!("│ {} │", pad_str(content, self.width, Alignment::Left, Some("…")))
    }
}

fn two_cols(left: &str, right: &str, width: usize) -> String {
    let right_w: usize = console::measure_text_width(right);
    let mut left: String = left.to_string();
    if console::measure_text_width(&left) + 1 + right_w > width {
        let space: usize = width.saturating_sub(1 + right_w);
        left = console::truncate_str(&left, space, "…").into_owned();
    }
    let gap: usize = width
        .saturating_sub(console::measure_text_width(&left) + right_w)
        .max(1);
    format!("{left}{}{right}", " ".repeat(gap))
}

fn join_cols(cells: &[String]) -> String {
    cells
        .iter()
        .zip(COLUMNS.iter())
        .map(|(text, (_, width))| pad_str(text, *width, Alignment::Left, Some("…")).into_owned())
        .collect::<Vec<String>>()
        .join(" ")
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
