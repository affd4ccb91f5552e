//! Unit tests for handshake message parsing and rendering.

use glog::protocol::frame::LogStreamId;
use glog::protocol::message::HandshakeMessage;
use glog::AppError;

#[test]
fn every_verb_parses() {
    let cases = [
        ("new-client:web-01", HandshakeMessage::NewClient("web-01".into())),
        ("confirm-client:web-01", HandshakeMessage::ConfirmClient("web-01".into())),
        ("new-log:app.log", HandshakeMessage::NewLog("app.log".into())),
        ("new-log-id:17", HandshakeMessage::NewLogId(LogStreamId::new(17))),
        ("confirmed-client:web-01", HandshakeMessage::ConfirmedClient("web-01".into())),
        ("ok-client:web-01", HandshakeMessage::OkClient("web-01".into())),
    ];
    for (line, expected) in cases {
        assert_eq!(HandshakeMessage::parse(line).unwrap(), expected, "line {line}");
        assert_eq!(expected.to_string(), line);
    }
}

#[test]
fn argument_keeps_everything_after_first_separator() {
    let msg = HandshakeMessage::parse("new-log:weird:name").unwrap();
    assert_eq!(msg, HandshakeMessage::NewLog("weird:name".into()));
}

#[test]
fn malformed_lines_are_handshake_errors() {
    for line in [
        "",
        "new-client",
        "new-client:",
        "hello:world",
        "new-log-id:abc",
        "new-log-id:300",
    ] {
        let err = HandshakeMessage::parse(line).unwrap_err();
        assert!(matches!(err, AppError::Handshake(_)), "line {line:?} gave {err}");
        assert!(!err.is_recoverable());
    }
}

#[test]
fn verb_names_match_wire_format() {
    assert_eq!(HandshakeMessage::NewClient("a".into()).verb(), "new-client");
    assert_eq!(HandshakeMessage::NewLogId(LogStreamId::new(0)).verb(), "new-log-id");
    assert_eq!(HandshakeMessage::OkClient("a".into()).verb(), "ok-client");
}
