//! Middleware log routing and transport-failure inspection.
//!
//! Sessions report through free-text log lines.  [`LogRouter`] forwards them
//! to `tracing` at the matching level; [`is_transport_failure`] recognises
//! the lines that mean a connection to a peer or master was lost, for
//! transports that have no structured failure signal.

use std::sync::Arc;

use rsb_types::LogLevel;
use tracing::{debug, error, info, warn};

use crate::session::LogCallback;

/// What a [`LogLevel::Fatal`] line does after it is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Terminate the process with exit status 1.
    #[default]
    Exit,
    /// Log at error level and carry on.
    LogOnly,
}

/// Forwards session log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRouter {
    fatal: FatalPolicy,
}

impl LogRouter {
    pub fn new(fatal: FatalPolicy) -> Self {
        Self { fatal }
    }

    /// A router that never terminates the process.
    pub fn log_only() -> Self {
        Self::new(FatalPolicy::LogOnly)
    }

    pub fn fatal_policy(&self) -> FatalPolicy {
        self.fatal
    }

    /// Log `message` from `source` (a node name or topic) at `level`.
    pub fn route(&self, source: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(source = %source, "{message}"),
            LogLevel::Info => info!(source = %source, "{message}"),
            LogLevel::Warn => warn!(source = %source, "{message}"),
            LogLevel::Error => error!(source = %source, "{message}"),
            LogLevel::Fatal => {
                error!(source = %source, fatal = true, "{message}");
                if self.fatal == FatalPolicy::Exit {
                    std::process::exit(1);
                }
            }
        }
    }

    /// A [`LogCallback`] routing lines tagged with `source`.
    pub fn callback(self, source: impl Into<String>) -> LogCallback {
        let source = source.into();
        Arc::new(move |level, message| self.route(&source, level, message))
    }
}

/// Whether `message` reports a lost TCP connection: it mentions an error
/// and, somewhere after that, `tcp` (e.g. `got an error: dial tcp …`).
pub fn is_transport_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    match lower.find("error") {
        Some(at) => lower[at..].contains("tcp"),
        None => false,
    }
}
