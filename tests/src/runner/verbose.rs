#![cfg(test)]
use std::fs;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::support::{self, Streaming};

#[tokio::test]
async fn quiet_run_draws_table_and_still_captures_raw_output() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(dir.path(), vec![support::stage("stream")]);
    let (runner, captured) = support::runner(cfg, support::registry([Streaming::new("stream")]));

    runner.run(CancellationToken::new(), "example.com").await.unwrap();

    let screen: String = captured.contents();
    assert!(screen.contains("CHAINSCAN"), "{screen}");
    assert!(screen.contains("Target: example.com"), "{screen}");
    assert!(!screen.contains("stdout-test"), "{screen}");

    let raw: PathBuf = support::group_dir(dir.path(), "example.com")
        .join("raw")
        .join("stream");
    let outs = support::files_with_ext(&raw, "out");
    let errs = support::files_with_ext(&raw, "err");
    assert_eq!(fs::read_to_string(&outs[0]).unwrap(), "stdout-test\n");
    assert_eq!(fs::read_to_string(&errs[0]).unwrap(), "stderr-test\n");
}

#[tokio::test]
async fn verbose_run_prints_events_and_prefixed_tool_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = support::config(
        dir.path(),
        vec![
            support::stage("stream").with_flags(["-token", "hunter2", "{{targets_file}}"]),
            support::stage("idle").disabled(),
        ],
    );
    cfg.verbose = true;
    let (runner, captured) = support::runner(cfg, support::registry([Streaming::new("stream")]));

    runner.run(CancellationToken::new(), "example.com").await.unwrap();

    let lines: Vec<String> = captured.lines();
    let has = |needle: &str| lines.iter().any(|line| line.contains(needle));

    assert!(!has("CHAINSCAN"), "{lines:#?}");
    assert!(has("TIME"));
    assert!(lines.iter().any(|l| l.contains("stream") && l.contains("queued")));
    assert!(lines.iter().any(|l| l.contains("idle") && l.contains("skipped")));
    assert!(lines.iter().any(|l| l.contains("stream") && l.contains("start")));
    assert!(lines.iter().any(|l| l.contains("stream") && l.contains("done")));
    assert!(has("timeout  30s"), "{lines:#?}");
    assert!(has("info    dir="), "{lines:#?}");

    let cmd: &String = lines
        .iter()
        .find(|l| l.contains("cmd "))
        .expect("no cmd line");
    assert!(cmd.contains("/bin/true -token"), "{cmd}");
    assert!(!cmd.contains("hunter2"), "{cmd}");

    assert!(lines.iter().any(|l| l.contains("stream") && l.ends_with("stdout  stdout-test")));
    assert!(lines.iter().any(|l| l.contains("stream") && l.ends_with("stderr  stderr-test")));
}
