//! Process run mode, i.e. whether this process collects or ships logs.
//!
//! `RunMode` is read from the `mode` key of the configuration file and can
//! be overridden with the `--mode` CLI flag.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level role of the process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Collector: accepts agent connections and persists their logs.
    Server,
    /// Agent: tails local files and streams them to a collector.
    Client,
}

impl RunMode {
    /// Short name used in log records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}
