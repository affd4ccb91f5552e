#![forbid(unsafe_code)]

//! `glog`: remote log shipping over a multiplexed TCP stream.
//!
//! An agent tails a fixed set of local files and forwards appended lines to
//! a collector, which writes them to one directory per agent. Both roles
//! live in the same binary; [`config::GlobalConfig::mode`] selects which
//! one runs.

pub mod agent;
pub mod collector;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod mode;
pub mod path_safety;
pub mod protocol;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
