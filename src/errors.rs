//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Handshake protocol violation (unexpected verb, name mismatch, timeout).
    Handshake(String),
    /// Malformed or unroutable steady-state frame. Recoverable per frame.
    Frame(String),
    /// Network connect, read, or write failure.
    Transport(String),
    /// Tailing a local file failed (open, read, rotation budget exhausted).
    Tail(String),
    /// Writing received data to the collector workspace failed.
    Persist(String),
    /// A peer-supplied name is not a safe single path component.
    PathViolation(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error only affects the frame being processed.
    ///
    /// Readers skip recoverable errors and keep the session alive; every
    /// other variant ends the session that produced it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Frame(msg) => write!(f, "frame: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Tail(msg) => write!(f, "tail: {msg}"),
            Self::Persist(msg) => write!(f, "persist: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
