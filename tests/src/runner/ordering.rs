#![cfg(test)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::{self, Blocking, Journal, Recorder};

/// The second stage must not start while the first is still running, even
/// with plenty of concurrency slots, and the first stage's capture files
/// must already exist while it runs.
#[tokio::test]
async fn stages_run_in_declared_order_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = support::config(
        dir.path(),
        vec![support::stage("first"), support::stage("second")],
    );
    cfg.concurrency = 16;

    let first_started = Arc::new(Notify::new());
    let first_release = Arc::new(Notify::new());
    let second_started = Arc::new(Notify::new());
    let second_release = Arc::new(Notify::new());
    second_release.notify_one();

    let registry = support::registry([
        Blocking::new("first", &first_started, &first_release),
        Blocking::new("second", &second_started, &second_release),
    ]);
    let (runner, _captured) = support::runner(cfg, registry);

    let raw_first: PathBuf = support::group_dir(dir.path(), "example.com")
        .join("raw")
        .join("first");

    let observe = async {
        timeout(Duration::from_secs(2), first_started.notified())
            .await
            .expect("first stage never started");

        assert!(raw_first.is_dir(), "raw dir missing while first stage runs");
        assert_eq!(support::files_with_ext(&raw_first, "out").len(), 1);

        let early = timeout(Duration::from_millis(250), second_started.notified()).await;
        assert!(early.is_err(), "second stage started before first finished");

        first_release.notify_one();
        timeout(Duration::from_secs(2), second_started.notified())
            .await
            .expect("second stage never started");
    };

    let (result, ()) = tokio::join!(runner.run(CancellationToken::new(), "example.com"), observe);
    assert!(result.is_ok(), "run failed: {:?}", result.err());
}

#[tokio::test(start_paused = true)]
async fn every_group_runs_every_stage_sequentially() {
    let dir = tempfile::tempdir().unwrap();
    let targets = dir.path().join("targets.txt");
    std::fs::write(&targets, "a.example.com\nother.org\nb.example.com\n").unwrap();

    let mut cfg = support::config(
        &dir.path().join("out"),
        vec![support::stage("one"), support::stage("two")],
    );
    cfg.concurrency = 8;

    let log: Journal = Journal::default();
    let registry = support::registry([
        Recorder::new("one", &log, Duration::from_millis(50)),
        Recorder::new("two", &log, Duration::from_millis(10)),
    ]);
    let (runner, _captured) = support::runner(cfg, registry);

    runner
        .run(CancellationToken::new(), targets.to_str().unwrap())
        .await
        .unwrap();

    let expected: Vec<&str> = vec![
        "one:start", "one:end", "two:start", "two:end",
        "one:start", "one:end", "two:start", "two:end",
    ];
    assert_eq!(support::entries(&log), expected);

    for apex in ["example.com", "other.org"] {
        let group = support::group_dir(&dir.path().join("out"), apex);
        assert!(group.join("input").join("targets.txt").is_file(), "{apex} has no base targets");
        assert!(group.join("raw").join("one").is_dir());
        assert!(group.join("raw").join("two").is_dir());
    }

    let base = support::group_dir(&dir.path().join("out"), "example.com")
        .join("input")
        .join("targets.txt");
    assert_eq!(
        std::fs::read_to_string(base).unwrap(),
        "a.example.com\nb.example.com\n"
    );
}

#[tokio::test]
async fn disabled_stage_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(
        dir.path(),
        vec![support::stage("on"), support::stage("off").disabled()],
    );

    let log: Journal = Journal::default();
    let registry = support::registry([
        Recorder::new("on", &log, Duration::ZERO),
        Recorder::new("off", &log, Duration::ZERO),
    ]);
    let (runner, captured) = support::runner(cfg, registry);

    runner.run(CancellationToken::new(), "example.com").await.unwrap();

    assert_eq!(support::entries(&log), ["on:start", "on:end"]);
    let raw = support::group_dir(dir.path(), "example.com").join("raw");
    assert!(!raw.join("off").exists());

    let table: String = captured.contents();
    assert!(table.contains("skipped"), "table: {table}");
    assert!(table.contains("success"), "table: {table}");
}

#[tokio::test]
async fn disabled_stage_needs_no_registration() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(
        dir.path(),
        vec![support::stage("on"), support::stage("ghost").disabled()],
    );

    let log: Journal = Journal::default();
    let registry = support::registry([Recorder::new("on", &log, Duration::ZERO)]);
    let (runner, _captured) = support::runner(cfg, registry);

    runner.run(CancellationToken::new(), "example.com").await.unwrap();
    assert_eq!(support::entries(&log), ["on:start", "on:end"]);
}
