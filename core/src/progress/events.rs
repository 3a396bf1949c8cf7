use std::time::Duration;

use chrono::Local;
use tracing::warn;

use super::console::Console;
use super::format_duration;

/// Fixed-width event lines used instead of the table in verbose mode.
///
/// `TIME      APEX                TOOL          EVENT   DUR     EXIT`
#[derive(Debug, Clone)]
pub struct EventLog {
    console: Console,
    apex: String,
}

impl EventLog {
    pub fn new(console: Console, apex: &str) -> Self {
        Self {
            console,
            apex: apex.to_string(),
        }
    }

    pub fn header(&self) {
        self.emit(format_row("TIME", "APEX", "TOOL", "EVENT", "DUR", "EXIT"));
    }

    pub fn queued(&self, tool: &str) {
        self.event(tool, "queued", "-", "-");
    }

    pub fn skipped(&self, tool: &str) {
        self.event(tool, "skipped", &format_duration(Duration::ZERO), "0");
    }

    pub fn start(&self, tool: &str) {
        self.event(tool, "start", "-", "-");
    }

    pub fn done(&self, tool: &str, dur: Duration, exit: i32) {
        self.event(tool, "done", &format_duration(dur), &exit.to_string());
    }

    pub fn fail(&self, tool: &str, dur: Duration, exit: i32) {
        self.event(tool, "fail", &format_duration(dur), &exit.to_string());
    }

    /// `0` prints as `disabled`.
    pub fn timeout(&self, tool: &str, timeout: Option<Duration>) {
        let text: String = match timeout {
            Some(t) if !t.is_zero() => format!("{}s", t.as_secs()),
            _ => "disabled".to_string(),
        };
        self.detail(tool, "timeout", &text);
    }

    pub fn command(&self, tool: &str, command: &str) {
        self.detail(tool, "cmd", command);
    }

    pub fn error(&self, tool: &str, error: &dyn std::fmt::Display) {
        self.detail(tool, "error", &error.to_string());
    }

    /// Group-level `info key=value` line.
    pub fn info(&self, tool: &str, key: &str, value: &str) {
        self.detail(tool, "info", &format!("{key}={value}"));
    }

    fn event(&self, tool: &str, event: &str, dur: &str, exit: &str) {
        self.emit(format_row(&now(), &self.apex, tool, event, dur, exit));
    }

    fn detail(&self, tool: &str, event: &str, text: &str) {
        self.emit(format!(
            "{:<8}  {:<18}  {:<12}  {:<6}  {}",
            now(),
            self.apex,
            tool,
            event,
            text
        ));
    }

    fn emit(&self, line: String) {
        if let Err(e) = self.console.line(&line) {
            warn!("event log write failed: {e}");
        }
    }
}

fn now() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn format_row(time: &str, apex: &str, tool: &str, event: &str, dur: &str, exit: &str) -> String {
    format!("{time:<8}  {apex:<18}  {tool:<12}  {event:<6}  {dur:<6}  {exit:<4}")
}
