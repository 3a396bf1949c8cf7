//! Terminal rendering for a run: the live [`ProgressTable`], the verbose
//! [`EventLog`] and the [`PrefixWriter`] that labels streamed tool output.
//! Everything writes through one shared [`Console`].

use std::time::Duration;

pub mod console;
pub mod events;
pub mod prefix_writer;
pub mod table;

pub use console::{Captured, Console};
pub use events::EventLog;
pub use prefix_writer::{PrefixWriter, time_prefix};
pub use table::{ProgressTable, RowStatus};

/// `0ms`, `12.34s` below a minute, `3m07s` above.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0ms".to_string();
    }
    if d < Duration::from_secs(60) {
        return format!("{:.2}s", d.as_secs_f64());
    }
    let secs: u64 = d.as_secs();
    format!("{}m{:02}s", secs / 60, secs % 60)
}
