//! Per-descriptor lifecycle behavior: idempotent start/stop, flag
//! resets on restart, kill escalation, and concurrent stop callers.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;

use procman::error::Error;
use procman::process::{Launch, Process, RunMode};
use procman::terminate::StopSignal;

fn launch() -> (Launch, mpsc::Receiver<Error>) {
    let (err_tx, err_rx) = mpsc::channel(1);
    (Launch::new(Arc::new(Vec::new()), err_tx), err_rx)
}

fn scratch_file(tag: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("procman-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn start_twice_spawns_once() {
    let file = scratch_file("start-twice");
    let proc = Arc::new(
        Process::new("web", format!("echo started >> {}; sleep 5", file.display()))
            .with_run_mode(RunMode::Silent)
            .with_grace(Duration::from_secs(2)),
    );
    let (launch, _err_rx) = launch();

    proc.start(&launch).await.unwrap();
    assert!(proc.running().await);
    proc.start(&launch).await.unwrap();
    assert!(proc.running().await);

    sleep(Duration::from_millis(300)).await;
    let spawned = std::fs::read_to_string(&file).unwrap();
    assert_eq!(spawned.lines().count(), 1);

    proc.stop(StopSignal::default()).await.unwrap();
    assert!(!proc.running().await);
}

#[tokio::test]
async fn stop_on_stopped_process_is_a_no_op() {
    let proc = Arc::new(
        Process::new("idle", "sleep 5")
            .with_run_mode(RunMode::Silent)
            .with_grace(Duration::from_secs(2)),
    );

    // never started
    proc.stop(StopSignal::default()).await.unwrap();
    assert!(!proc.running().await);

    let (launch, _err_rx) = launch();
    proc.start(&launch).await.unwrap();
    proc.stop(StopSignal::default()).await.unwrap();
    assert!(!proc.running().await);

    // already stopped
    proc.stop(StopSignal::default()).await.unwrap();
}

#[tokio::test]
async fn supervisor_stop_is_not_reported_as_failure() {
    let proc = Arc::new(
        Process::new("web", "sleep 5")
            .with_run_mode(RunMode::Silent)
            .with_grace(Duration::from_secs(2)),
    );
    let (launch, mut err_rx) = launch();

    proc.start(&launch).await.unwrap();
    proc.stop(StopSignal::default()).await.unwrap();

    assert!(proc.stopped_by_supervisor().await);
    assert!(err_rx.try_recv().is_err(), "stop must not feed the error channel");
}

#[tokio::test]
async fn restart_clears_flags_and_leaves_process_running() {
    let proc = Arc::new(
        Process::new("web", "sleep 5")
            .with_run_mode(RunMode::Silent)
            .with_grace(Duration::from_secs(2)),
    );
    let (launch, _err_rx) = launch();

    proc.start(&launch).await.unwrap();
    proc.stop(StopSignal::default()).await.unwrap();
    assert!(proc.stopped_by_supervisor().await);

    proc.start(&launch).await.unwrap();
    assert!(proc.running().await);
    assert!(!proc.stopped_by_supervisor().await);
    assert_eq!(proc.last_wait_error().await, None);

    proc.stop(StopSignal::default()).await.unwrap();
}

#[tokio::test]
async fn stop_escalates_to_kill_after_grace() {
    let grace = Duration::from_secs(1);
    let proc = Arc::new(
        Process::new(
            "stubborn",
            "trap '' INT TERM; while :; do sleep 0.1; done",
        )
        .with_run_mode(RunMode::Silent)
        .with_grace(grace),
    );
    let (launch, _err_rx) = launch();

    proc.start(&launch).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let begun = Instant::now();
    proc.stop(StopSignal::default()).await.unwrap();
    let elapsed = begun.elapsed();

    assert!(
        elapsed >= grace,
        "stop returned before the grace period: {elapsed:?}"
    );
    assert!(
        elapsed < grace + Duration::from_secs(4),
        "kill escalation took too long: {elapsed:?}"
    );
    assert!(!proc.running().await);
}

#[tokio::test]
async fn concurrent_stops_observe_one_termination() {
    let proc = Arc::new(
        Process::new(
            "stubborn",
            "trap '' INT TERM; while :; do sleep 0.1; done",
        )
        .with_run_mode(RunMode::Silent)
        .with_grace(Duration::from_millis(500)),
    );
    let (launch, _err_rx) = launch();

    proc.start(&launch).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let mut callers = Vec::new();
    for _ in 0..4 {
        let proc = Arc::clone(&proc);
        callers.push(tokio::spawn(async move {
            proc.stop(StopSignal::default()).await
        }));
    }

    for caller in callers {
        caller.await.unwrap().unwrap();
    }
    assert!(!proc.running().await);
}

#[tokio::test]
async fn failing_command_is_routed_to_the_error_channel() {
    let proc = Arc::new(
        Process::new("broken", "exit 3")
            .with_run_mode(RunMode::Silent)
            .with_grace(Duration::from_secs(2)),
    );
    let (launch, mut err_rx) = launch();

    proc.start(&launch).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), err_rx.recv())
        .await
        .expect("no error reported")
        .expect("error channel closed");
    match err {
        Error::ProcessFailed { name, detail } => {
            assert_eq!(name, "broken");
            assert!(detail.contains('3'), "{detail}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(proc.last_wait_error().await.is_some());
}
