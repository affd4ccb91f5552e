//! Integration tests for collector sessions.
//!
//! Sessions are driven over in-memory pipes where only one session matters,
//! and over loopback TCP where isolation between sessions is the point.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use glog::collector::connection::{serve_session, CollectorSettings};
use glog::collector::Collector;
use glog::protocol::codec::HandshakeCodec;
use glog::protocol::handshake::client_handshake;
use glog::protocol::message::HandshakeMessage;
use glog::session::{Lifecycle, SessionState};
use glog::AppError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::test_support::{collector_config, wait_for_content, WAIT};

fn settings(logdir: &std::path::Path) -> CollectorSettings {
    CollectorSettings {
        logdir: logdir.to_path_buf(),
        handshake_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn frames_are_demultiplexed_and_stray_ids_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let (agent_io, collector_io) = tokio::io::duplex(4096);
    let lifecycle = Lifecycle::handshaking();
    let cancel = CancellationToken::new();

    let agent = async {
        let mut framed = Framed::new(agent_io, HandshakeCodec::new());
        let labels = vec!["a.log".to_owned(), "b.log".to_owned()];
        client_handshake(&mut framed, "web-01", &labels).await.unwrap();
        let mut io = framed.into_inner();
        io.write_all(b"!:0:hello\n!:7:stray\nnot a frame\n!:1:world\n!:0:again\n")
            .await
            .unwrap();
        io.shutdown().await.unwrap();
    };

    let (_, result) = tokio::join!(agent, serve_session(collector_io, &settings, &lifecycle, &cancel));
    result.unwrap();
    assert_eq!(lifecycle.state(), SessionState::Closed);

    let dir = tmp.path().join("web-01");
    assert_eq!(std::fs::read_to_string(dir.join("a.log")).unwrap(), "hello\nagain\n");
    assert_eq!(std::fs::read_to_string(dir.join("b.log")).unwrap(), "world\n");
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
}

#[tokio::test]
async fn data_sent_with_the_final_handshake_message_is_kept() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let (mut agent_io, collector_io) = tokio::io::duplex(4096);
    let lifecycle = Lifecycle::handshaking();
    let cancel = CancellationToken::new();

    let agent = async {
        agent_io
            .write_all(b"new-client:web-01\nnew-log:a.log\nconfirmed-client:web-01\n!:0:early\n")
            .await
            .unwrap();
        agent_io.shutdown().await.unwrap();
        // Keep the read half open until the collector is done replying.
        let mut sink = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut agent_io, &mut sink).await.unwrap();
        String::from_utf8(sink).unwrap()
    };

    let (replies, result) = tokio::join!(agent, serve_session(collector_io, &settings, &lifecycle, &cancel));
    result.unwrap();
    assert_eq!(replies, "confirm-client:web-01\nnew-log-id:0\nok-client:web-01\n");
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("web-01").join("a.log")).unwrap(),
        "early\n"
    );
}

#[tokio::test]
async fn silent_peer_hits_handshake_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = CollectorSettings {
        logdir: tmp.path().to_path_buf(),
        handshake_timeout: Duration::from_millis(100),
    };
    let (_agent_io, collector_io) = tokio::io::duplex(4096);
    let lifecycle = Lifecycle::handshaking();

    let err = serve_session(collector_io, &settings, &lifecycle, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Handshake(_)), "got {err}");
    assert_eq!(lifecycle.state(), SessionState::Closed);
}

#[tokio::test]
async fn cancellation_closes_streaming_session() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let (agent_io, collector_io) = tokio::io::duplex(4096);
    let lifecycle = Lifecycle::handshaking();
    let cancel = CancellationToken::new();
    let mut state = lifecycle.subscribe();

    let agent = async {
        let mut framed = Framed::new(agent_io, HandshakeCodec::new());
        client_handshake(&mut framed, "web-01", &["a.log".to_owned()])
            .await
            .unwrap();
        state
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();
        cancel.cancel();
        framed
    };

    let (_framed, result) = tokio::join!(agent, serve_session(collector_io, &settings, &lifecycle, &cancel));
    result.unwrap();
    assert_eq!(lifecycle.state(), SessionState::Closed);
}

#[tokio::test]
async fn bad_handshake_does_not_disturb_other_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = Collector::bind(&collector_config(tmp.path())).await.unwrap();
    let addr = collector.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(collector.run(cancel.clone()));

    // A healthy agent finishes its handshake first.
    let good = TcpStream::connect(addr).await.unwrap();
    let mut good = Framed::new(good, HandshakeCodec::new());
    client_handshake(&mut good, "good", &["app.log".to_owned()])
        .await
        .unwrap();

    // Then two misbehaving peers connect.
    let mut garbage = TcpStream::connect(addr).await.unwrap();
    garbage.write_all(b"this is not a handshake\n").await.unwrap();

    let evil = TcpStream::connect(addr).await.unwrap();
    let mut evil = Framed::new(evil, HandshakeCodec::new());
    evil.send(HandshakeMessage::NewClient("..".into())).await.unwrap();
    let reply = tokio::time::timeout(WAIT, evil.next()).await.unwrap();
    assert!(reply.is_none(), "collector should drop a traversal name");

    // The healthy session keeps streaming.
    let mut io = good.into_inner();
    io.write_all(b"!:0:still here\n").await.unwrap();
    wait_for_content(&tmp.path().join("good").join("app.log"), "still here\n").await;
    assert!(!tmp.path().join("..").join("app.log").exists());

    cancel.cancel();
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap().unwrap();
}
