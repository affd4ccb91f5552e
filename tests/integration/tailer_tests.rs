//! Integration tests for the file tailer against a real file system.
//!
//! Each test opens a tailer on a temporary file, mutates the file the way
//! log writers and rotation tools do, and checks the frames that come out.

use std::path::Path;
use std::time::Duration;

use glog::agent::tailer::{FileTailer, TailTarget};
use glog::config::RotationPolicy;
use glog::protocol::frame::{Frame, LogStreamId};
use glog::protocol::MAX_LINE_PAYLOAD_BYTES;
use glog::AppError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_support::{append, chunked_line, WAIT};

fn target(id: u8, path: &Path) -> TailTarget {
    TailTarget {
        id: LogStreamId::new(id),
        label: format!("stream-{id}"),
        path: path.to_path_buf(),
    }
}

async fn start(
    target: TailTarget,
    policy: RotationPolicy,
    out: mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> JoinHandle<glog::Result<()>> {
    let tailer = FileTailer::open(target, policy).await.unwrap();
    tokio::spawn(tailer.run(out, cancel.clone()))
}

/// Receive frames until their concatenated payloads equal `expected`.
async fn collect_until(rx: &mut mpsc::Receiver<Frame>, expected: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut text = String::new();
    while text.len() < expected.len() {
        let frame = tokio::time::timeout(WAIT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out; have {text:?}, want {expected:?}"))
            .unwrap();
        text.push_str(std::str::from_utf8(&frame.payload).unwrap());
        frames.push(frame);
    }
    assert_eq!(text, expected);
    frames
}

#[tokio::test]
async fn existing_content_is_skipped_and_appends_are_shipped() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "history\n").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(2, &path), RotationPolicy::default(), tx, &cancel).await;

    append(&path, "fresh\n");
    let frames = collect_until(&mut rx, "fresh\n").await;
    assert!(frames.iter().all(|f| f.id == LogStreamId::new(2)));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn partial_line_waits_for_its_terminator() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    append(&path, "one\ntw");
    collect_until(&mut rx, "one\n").await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "unterminated line must not be emitted"
    );

    append(&path, "o\n");
    collect_until(&mut rx, "two\n").await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn rotation_loses_no_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    append(&path, "a\n");
    collect_until(&mut rx, "a\n").await;

    append(&path, "b\n");
    std::fs::rename(&path, tmp.path().join("app.log.1")).unwrap();
    std::fs::write(&path, "c\n").unwrap();
    collect_until(&mut rx, "b\nc\n").await;

    append(&path, "d\n");
    collect_until(&mut rx, "d\n").await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn partial_line_is_terminated_when_file_rotates() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    append(&path, "old-partial");
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::rename(&path, tmp.path().join("app.log.1")).unwrap();
    std::fs::write(&path, "new-line\n").unwrap();

    let frames = collect_until(&mut rx, "old-partial\nnew-line\n").await;
    assert!(frames.iter().all(|f| f.payload.ends_with(b"\n")));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn delayed_recreation_within_budget_is_followed() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let policy = RotationPolicy {
        interval: Duration::from_millis(20),
        max_attempts: 50,
    };
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), policy, tx, &cancel).await;

    std::fs::rename(&path, tmp.path().join("app.log.1")).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    std::fs::write(&path, "back\n").unwrap();
    collect_until(&mut rx, "back\n").await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn truncation_rewinds_to_start() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "0123456789\n").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    std::fs::write(&path, "new\n").unwrap();
    collect_until(&mut rx, "new\n").await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn partial_line_is_terminated_when_file_is_truncated() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    append(&path, "cut off mid-");
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, "x\n").unwrap();

    collect_until(&mut rx, "cut off mid-\nx\n").await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn long_terminated_line_is_shipped_in_bounded_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    let long = "b".repeat(MAX_LINE_PAYLOAD_BYTES * 5 / 2);
    append(&path, &format!("{long}\n"));

    collect_until(&mut rx, &chunked_line(&long)).await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn long_unterminated_line_does_not_grow_the_buffer() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;

    let chunk = "c".repeat(MAX_LINE_PAYLOAD_BYTES - 1);
    append(&path, &format!("{chunk}{chunk}cc"));

    let frames = collect_until(&mut rx, &format!("{chunk}\n{chunk}\n")).await;
    assert!(frames.iter().all(|f| f.payload.len() <= MAX_LINE_PAYLOAD_BYTES));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "short unterminated tail must stay buffered"
    );

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn exhausted_retry_budget_stops_only_that_tailer() {
    let tmp = tempfile::tempdir().unwrap();
    let doomed = tmp.path().join("doomed.log");
    let steady = tmp.path().join("steady.log");
    std::fs::write(&doomed, "").unwrap();
    std::fs::write(&steady, "").unwrap();

    let policy = RotationPolicy {
        interval: Duration::from_millis(10),
        max_attempts: 3,
    };
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let doomed_task = start(target(0, &doomed), policy, tx.clone(), &cancel).await;
    let steady_task = start(target(1, &steady), policy, tx, &cancel).await;

    std::fs::rename(&doomed, tmp.path().join("doomed.log.1")).unwrap();
    let result = tokio::time::timeout(WAIT, doomed_task).await.unwrap().unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, AppError::Tail(_)), "got {err}");
    assert!(err.to_string().contains("retries exceeded"), "got {err}");

    append(&steady, "alive\n");
    let frames = collect_until(&mut rx, "alive\n").await;
    assert!(frames.iter().all(|f| f.id == LogStreamId::new(1)));

    cancel.cancel();
    steady_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_file_fails_to_open() {
    let tmp = tempfile::tempdir().unwrap();
    let err = FileTailer::open(target(0, &tmp.path().join("absent.log")), RotationPolicy::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::Tail(_)));
}

#[tokio::test]
async fn closed_queue_stops_the_tailer() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let handle = start(target(0, &path), RotationPolicy::default(), tx, &cancel).await;
    drop(rx);

    append(&path, "nobody listens\n");
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}
