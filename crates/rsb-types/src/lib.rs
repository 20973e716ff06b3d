//! `rsb-types` – shared vocabulary of the ROS sensor bridge.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the loosely typed [`Readings`] map used at the sensor boundary, the
//! middleware [`LogLevel`], the [`BridgeError`] taxonomy, and the external
//! [`Sensor`] abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generic key-value readings map exchanged with the sensor abstraction.
///
/// Nested wire messages flatten into nested objects; arrays into JSON arrays.
pub type Readings = serde_json::Map<String, serde_json::Value>;

/// Key injected into every subscribed snapshot, holding the receive time as
/// UTC epoch milliseconds.
pub const TIMESTAMP_KEY: &str = "Timestamp";

/// Severity of a log event emitted by the middleware session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// Unrecoverable middleware condition; terminates the process by default.
    Fatal,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Fatal => write!(f, "fatal"),
        }
    }
}

/// Error taxonomy spanning the registry, the session layer, and the
/// per-sensor loops.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("type not found: {0}")]
    TypeNotFound(String),

    #[error("{type_name}: required field '{field}' not found")]
    FieldNotFound { type_name: String, field: String },

    #[error("{type_name}: field '{field}' has the wrong type, expected {expected}")]
    FieldWrongType {
        type_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("{type_name}: cannot decode readings: {details}")]
    Decode { type_name: String, details: String },

    #[error("cannot flatten message into readings: {0}")]
    Flatten(String),

    #[error("message of type {actual} delivered to a {expected} callback")]
    TypeMismatch { expected: String, actual: String },

    #[error("connection to master {master} failed: {details}")]
    ConnectionFailure { master: String, details: String },

    #[error("node terminated")]
    NodeTerminated,

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("reading sensor {sensor} failed: {details}")]
    ReadFailure { sensor: String, details: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("channel error: {0}")]
    Channel(String),
}

impl BridgeError {
    /// `true` for failures of the session/transport layer, which are answered
    /// with a reconnect rather than surfaced to the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionFailure { .. }
                | BridgeError::NodeTerminated
                | BridgeError::TransportFailure(_)
        )
    }
}

/// The external sensor abstraction.
///
/// Publish-mode bindings consume an implementation once per cadence tick;
/// subscribe-mode components implement it to expose their latest snapshot.
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Stable name of the sensor, as referenced from configuration.
    fn name(&self) -> &str;

    /// Take one reading.  `extra` carries caller-supplied options.
    async fn readings(&self, extra: &Readings) -> Result<Readings, BridgeError>;
}
