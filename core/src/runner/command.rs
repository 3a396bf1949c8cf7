const REDACTED: &str = "REDACTED";
const SECRET_MARKERS: &[&str] = &[
    "token", "secret", "apikey", "api-key", "password", "pass", "bearer",
];

/// `binary arg1 arg2`, for display only.
pub fn format_command(binary: &str, args: &[String]) -> String {
    if args.is_empty() {
        return binary.to_string();
    }
    format!("{binary} {}", args.join(" "))
}

/// Hides values of secret-looking arguments.
///
/// `--token=abc` keeps its key, `--token abc` hides the following argument.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(args.len());
    let mut redact_next: bool = false;

    for arg in args {
        if redact_next {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }

        let lower: String = arg.to_lowercase();
        if !SECRET_MARKERS.iter().any(|marker| lower.contains(marker)) {
            out.push(arg.clone());
            continue;
        }

        match arg.split_once('=') {
            Some((key, _)) => out.push(format!("{key}={REDACTED}")),
            None => {
                out.push(arg.clone());
                redact_next = true;
            }
        }
    }
    out
}
