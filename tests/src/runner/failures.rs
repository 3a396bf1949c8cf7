#![cfg(test)]
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chainscan_core::PipelineError;
use chainscan_core::stage::StageFailure;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::{self, Blocking, BrokenStore, Emit, Failing, Journal, Recorder};

#[tokio::test]
async fn missing_targets_file_fails_before_any_group() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let cfg = support::config(&out, vec![support::stage("noop")]);
    let log: Journal = Journal::default();
    let (runner, _captured) =
        support::runner(cfg, support::registry([Recorder::new("noop", &log, Duration::ZERO)]));

    let errors = runner
        .run(CancellationToken::new(), "/this/does/not/exist/targets.txt")
        .await
        .unwrap_err();

    assert!(errors.to_string().contains("targets file not found"), "{errors}");
    assert!(matches!(errors.first(), Some(PipelineError::TargetsFileNotFound(_))));
    assert!(support::entries(&log).is_empty());
    assert!(!out.exists());
}

#[tokio::test]
async fn empty_targets_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("empty.txt");
    fs::write(&list, "\n  \n").unwrap();

    let cfg = support::config(&dir.path().join("out"), vec![support::stage("noop")]);
    let log: Journal = Journal::default();
    let (runner, _captured) =
        support::runner(cfg, support::registry([Recorder::new("noop", &log, Duration::ZERO)]));

    let errors = runner
        .run(CancellationToken::new(), list.to_str().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(errors.first(), Some(PipelineError::NoTargets)));
}

#[tokio::test]
async fn unregistered_stage_fails_before_running_anything() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(
        dir.path(),
        vec![support::stage("known"), support::stage("missing")],
    );
    let log: Journal = Journal::default();
    let (runner, _captured) =
        support::runner(cfg, support::registry([Recorder::new("known", &log, Duration::ZERO)]));

    let errors = runner
        .run(CancellationToken::new(), "example.com")
        .await
        .unwrap_err();

    assert_eq!(errors.to_string(), "stage missing not registered");
    assert!(support::entries(&log).is_empty());
    assert!(!support::group_dir(dir.path(), "example.com").exists());
}

#[tokio::test]
async fn fail_fast_stops_after_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("targets.txt");
    fs::write(&list, "a.example.com\nb.other.org\n").unwrap();

    let out = dir.path().join("out");
    let cfg = support::config(
        &out,
        vec![support::stage("broken"), support::stage("after")],
    );
    let log: Journal = Journal::default();
    let registry = support::registry([
        Failing::new("broken", 2),
        Recorder::new("after", &log, Duration::ZERO),
    ]);
    let (runner, _captured) = support::runner(cfg, registry);

    let errors = runner
        .run(CancellationToken::new(), list.to_str().unwrap())
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 1);
    match errors.first() {
        Some(PipelineError::Stage { group, stage, source }) => {
            assert_eq!(group, "example.com");
            assert_eq!(stage, "broken");
            assert!(matches!(source, StageFailure::Exit(2)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(support::entries(&log).is_empty());
    assert!(!support::group_dir(&out, "other.org").exists());

    // the failed invocation is still persisted
    let raw = support::group_dir(&out, "example.com").join("raw").join("broken");
    let errs = support::files_with_ext(&raw, "err");
    assert_eq!(errs.len(), 1);
    assert_eq!(fs::read_to_string(&errs[0]).unwrap(), "boom\n");
    assert_eq!(support::files_with_ext(&raw, "json").len(), 1);
}

#[tokio::test]
async fn without_fail_fast_errors_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("targets.txt");
    fs::write(&list, "a.example.com\nb.other.org\n").unwrap();

    let out = dir.path().join("out");
    let mut cfg = support::config(
        &out,
        vec![support::stage("broken"), support::stage("after")],
    );
    cfg.fail_fast = false;

    let log: Journal = Journal::default();
    let registry = support::registry([
        Failing::new("broken", 1),
        Recorder::new("after", &log, Duration::ZERO),
    ]);
    let (runner, captured) = support::runner(cfg, registry);

    let errors = runner
        .run(CancellationToken::new(), list.to_str().unwrap())
        .await
        .unwrap_err();

    let groups: Vec<String> = errors
        .iter()
        .map(|err| match err {
            PipelineError::Stage { group, .. } => group.clone(),
            other => panic!("unexpected error: {other:?}"),
        })
        .collect();
    assert_eq!(groups, ["example.com", "other.org"]);
    assert_eq!(
        errors.to_string(),
        "[example.com] broken failed: exit status 1; [other.org] broken failed: exit status 1"
    );
    assert_eq!(
        support::entries(&log),
        ["after:start", "after:end", "after:start", "after:end"]
    );
    assert!(captured.contents().contains("fail"));
}

#[tokio::test]
async fn cancelled_before_start_is_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(dir.path(), vec![support::stage("noop")]);
    let log: Journal = Journal::default();
    let (runner, _captured) =
        support::runner(cfg, support::registry([Recorder::new("noop", &log, Duration::ZERO)]));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let errors = runner.run(cancel, "example.com").await.unwrap_err();

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.first(), Some(PipelineError::Interrupted)));
    assert!(support::entries(&log).is_empty());
    assert!(!support::group_dir(dir.path(), "example.com").exists());
}

#[tokio::test]
async fn cancel_mid_stage_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = support::config(
        dir.path(),
        vec![support::stage("long"), support::stage("never")],
    );
    cfg.fail_fast = false;
    cfg.tool_timeout_sec = 0;

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let log: Journal = Journal::default();
    let registry = support::registry([
        Blocking::new("long", &started, &release),
        Recorder::new("never", &log, Duration::ZERO),
    ]);
    let (runner, _captured) = support::runner(cfg, registry);

    let cancel = CancellationToken::new();
    let interrupt = async {
        timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("stage never started");
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(runner.run(cancel.clone(), "example.com"), interrupt);
    let errors = result.unwrap_err().into_vec();

    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(matches!(
        &errors[0],
        PipelineError::Stage { source: StageFailure::Cancelled, .. }
    ));
    assert!(matches!(errors[1], PipelineError::Interrupted));
    assert!(support::entries(&log).is_empty());
}

#[tokio::test]
async fn store_failure_is_fatal_under_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = support::config(dir.path(), vec![support::stage("a"), support::stage("b")]);
    let log: Journal = Journal::default();
    let registry = support::registry([
        Emit::new("a", &["a.example.com"]),
        Recorder::new("b", &log, Duration::ZERO),
    ]);
    let (runner, _captured) = support::runner(cfg, registry);
    let runner = runner.with_store(Arc::new(BrokenStore));

    let errors = runner
        .run(CancellationToken::new(), "example.com")
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 1, "{errors}");
    match errors.first() {
        Some(PipelineError::Persist { group, stage, .. }) => {
            assert_eq!(group, "example.com");
            assert_eq!(stage, "a");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(errors.to_string().contains("writing output: disk full"), "{errors}");
    assert!(support::entries(&log).is_empty());
}
