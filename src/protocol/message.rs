//! Handshake message grammar.
//!
//! Every handshake message is one ASCII line of the form `verb:argument`.
//! The argument extends to the end of the line, so it may itself contain
//! `:` characters.
//!
//! | Verb               | Direction          | Argument          |
//! |--------------------|--------------------|-------------------|
//! | `new-client`       | agent → collector  | agent name        |
//! | `confirm-client`   | collector → agent  | echoed name       |
//! | `new-log`          | agent → collector  | log label         |
//! | `new-log-id`       | collector → agent  | assigned id       |
//! | `confirmed-client` | agent → collector  | agent name        |
//! | `ok-client`        | collector → agent  | echoed name       |

use std::fmt::{Display, Formatter};

use crate::protocol::frame::LogStreamId;
use crate::{AppError, Result};

/// One parsed handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Agent announces its name.
    NewClient(String),
    /// Collector echoes the announced name.
    ConfirmClient(String),
    /// Agent registers one log label.
    NewLog(String),
    /// Collector answers a registration with the assigned id.
    NewLogId(LogStreamId),
    /// Agent ends registration.
    ConfirmedClient(String),
    /// Collector acknowledges; the session enters streaming.
    OkClient(String),
}

impl HandshakeMessage {
    /// Wire verb of the message.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::NewClient(_) => "new-client",
            Self::ConfirmClient(_) => "confirm-client",
            Self::NewLog(_) => "new-log",
            Self::NewLogId(_) => "new-log-id",
            Self::ConfirmedClient(_) => "confirmed-client",
            Self::OkClient(_) => "ok-client",
        }
    }

    /// Parse a single line (without its terminator).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the line has no `:` separator, an
    /// unknown verb, an empty argument, or a `new-log-id` argument that is
    /// not a valid stream id.
    pub fn parse(line: &str) -> Result<Self> {
        let (verb, arg) = line.split_once(':').ok_or_else(|| {
            AppError::Handshake(format!("message '{line}' has no verb separator"))
        })?;

        if arg.is_empty() {
            return Err(AppError::Handshake(format!(
                "message '{verb}' is missing its argument"
            )));
        }

        let arg = arg.to_owned();
        match verb {
            "new-client" => Ok(Self::NewClient(arg)),
            "confirm-client" => Ok(Self::ConfirmClient(arg)),
            "new-log" => Ok(Self::NewLog(arg)),
            "new-log-id" => LogStreamId::parse(arg.as_bytes())
                .map(Self::NewLogId)
                .map_err(|e| AppError::Handshake(format!("bad new-log-id: {e}"))),
            "confirmed-client" => Ok(Self::ConfirmedClient(arg)),
            "ok-client" => Ok(Self::OkClient(arg)),
            other => Err(AppError::Handshake(format!("unknown verb '{other}'"))),
        }
    }
}

impl Display for HandshakeMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewClient(arg)
            | Self::ConfirmClient(arg)
            | Self::NewLog(arg)
            | Self::ConfirmedClient(arg)
            | Self::OkClient(arg) => write!(f, "{}:{arg}", self.verb()),
            Self::NewLogId(id) => write!(f, "{}:{id}", self.verb()),
        }
    }
}
