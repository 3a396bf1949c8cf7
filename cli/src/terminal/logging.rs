use chainscan_common::log::SUCCESS_TARGET;
use colored::{Color, Colorize};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::{self, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent};
use tracing_subscriber::registry::LookupSpan;

use crate::terminal::colors;

const DEBUG_FILTER: &str = "warn,chainscan=debug";

/// One line per event: a level badge, the module in debug runs, then fields.
///
/// Success events get their own badge so finished stages stand out from
/// ordinary info lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFormatter {
    pub show_target: bool,
}

fn badge(level: &Level, target: &str) -> (&'static str, Color) {
    match *level {
        Level::INFO if target == SUCCESS_TARGET => ("[+]", colors::PRIMARY),
        Level::INFO => ("[i]", colors::ACCENT),
        Level::WARN => ("[!]", Color::Yellow),
        Level::ERROR => ("[x]", Color::Red),
        Level::DEBUG => ("[d]", Color::Blue),
        Level::TRACE => ("[.]", colors::SEPARATOR),
    }
}

/// `chainscan_core::runner` -> `core::runner`
fn short_target(target: &str) -> &str {
    target.strip_prefix("chainscan_").unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for LogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> format::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let (symbol, color) = badge(meta.level(), meta.target());

        let symbol = symbol.color(color);
        if *meta.level() <= Level::WARN {
            write!(writer, "{} ", symbol.bold())?;
        } else {
            write!(writer, "{symbol} ")?;
        }
        if self.show_target {
            write!(writer, "{} ", short_target(meta.target()).dimmed())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `debug`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(debug: bool) {
    let fallback: String = if debug {
        DEBUG_FILTER.to_string()
    } else {
        format!("warn,{SUCCESS_TARGET}=info")
    };
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(LogFormatter { show_target: debug })
        .try_init();
}
