/// Emits an info event on the `chainscan::success` target.
///
/// The CLI keeps this target at info level even when everything else is
/// filtered down to warnings.
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {
        ::tracing::info!(target: "chainscan::success", $($arg)*)
    };
}

pub const SUCCESS_TARGET: &str = "chainscan::success";
