//! Apex domain grouping.
//!
//! Each registrable domain (approximated by its last two labels) gets its own
//! output directory and its own pipeline run.

use std::collections::BTreeMap;
use std::net::IpAddr;

use url::Url;

pub const UNKNOWN_GROUP: &str = "unknown";

/// Partitions `targets` by apex key, keeping first-seen order in each group.
///
/// Keys come back in ascending order, which is the order groups are run in.
pub fn group_by_apex<I, S>(targets: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for target in targets {
        let target: String = target.into();
        let apex: String = apex_domain(&extract_host(&target));
        groups.entry(apex).or_default().push(target);
    }
    groups
}

/// Pulls the lowercase host out of a URL, a `host:port` pair or a bare host.
pub fn extract_host(target: &str) -> String {
    let s: &str = target.trim();
    if s.is_empty() {
        return String::new();
    }

    if s.contains("://")
        && let Ok(url) = Url::parse(s)
        && let Some(host) = url.host_str()
        && !host.is_empty()
    {
        return unbracket(host).to_lowercase();
    }

    if let Some((host, _port)) = split_host_port(s) {
        return host.to_lowercase();
    }

    s.to_lowercase()
}

/// Group key for a host: the literal IP, the last two labels, or `unknown`.
pub fn apex_domain(host: &str) -> String {
    let host: &str = host.trim().trim_matches('.');
    if host.is_empty() {
        return UNKNOWN_GROUP.to_string();
    }

    if let Ok(ip) = unbracket(host).parse::<IpAddr>() {
        return ip.to_string();
    }

    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        [.., second_last, last] => format!("{second_last}.{last}"),
        _ => host.to_string(),
    }
}

/// Folds a group key (or stage name) into a directory-safe token.
///
/// Lowercase ASCII letters and digits survive, everything else becomes `_`,
/// surrounding `_` are trimmed and an empty result maps to `unknown`.
pub fn sanitize_dir_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '_',
        })
        .collect();

    let trimmed: &str = folded.trim_matches('_');
    if trimmed.is_empty() {
        UNKNOWN_GROUP.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Splits `host:port` or `[v6]:port`. Anything else (including bare IPv6
/// literals with several colons) is not a host/port pair.
fn split_host_port(s: &str) -> Option<(&str, &str)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port: &str = tail.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = s.split_once(':')?;
    if port.contains(':') {
        return None;
    }
    Some((host, port))
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
