//! Error taxonomy for the dashboard core
//!
//! None of these errors terminate the dispatcher once it is running. Only
//! [`ConfigError`] is fatal, and only at startup.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::registry::DeviceId;

/// Broker unreachable, refused, or the message stream dropped.
///
/// Always answered with a backoff and a reconnect attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// TCP/TLS level failure while establishing the session
    #[error("Broker {host}:{port} unreachable: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },

    /// Broker answered the CONNECT with a non-success code
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    /// An established stream failed or was closed by the broker
    #[error("Message stream closed: {0}")]
    StreamClosed(String),
}

/// One topic pattern could not be subscribed.
///
/// Reported as a diagnostic, the remaining patterns and the session continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The client refused to send the request (invalid filter, closed client)
    #[error("Subscription to '{pattern}' failed: {reason}")]
    Request { pattern: String, reason: String },

    /// The broker acknowledged the request with a failure code
    #[error("Broker rejected subscription to '{pattern}'")]
    Rejected { pattern: String },
}

impl SubscriptionError {
    pub fn pattern(&self) -> &str {
        match self {
            SubscriptionError::Request { pattern, .. } => pattern,
            SubscriptionError::Rejected { pattern } => pattern,
        }
    }
}

/// Which decoding stage rejected a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Payload bytes are not UTF-8
    Encoding,
    /// Payload is not well-formed JSON
    Syntax,
    /// Well-formed, but does not fit the record schema
    Schema,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeErrorKind::Encoding => write!(f, "invalid encoding"),
            DecodeErrorKind::Syntax => write!(f, "invalid JSON"),
            DecodeErrorKind::Schema => write!(f, "schema violation"),
        }
    }
}

/// A payload that could not be turned into its typed record.
///
/// The offending message is dropped; the registry is never touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to decode payload on '{topic}' ({kind}): {reason}")]
pub struct DecodeError {
    pub topic: String,
    pub kind: DecodeErrorKind,
    pub reason: String,
}

impl DecodeError {
    pub fn new(topic: &str, kind: DecodeErrorKind, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.to_owned(),
            kind,
            reason: reason.into(),
        }
    }
}

/// A registry mutation referenced a device that never announced itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown device '{0}' (no discovery message seen yet)")]
pub struct UnknownDeviceError(pub DeviceId);

/// Unusable configuration; fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No topic subscriptions configured")]
    NoSubscriptions,

    #[error("Subscription pattern #{0} is empty")]
    EmptyPattern(usize),

    #[error("Broker host must not be empty")]
    EmptyHost,

    #[error("Reconnect interval must be greater than zero")]
    ZeroReconnectInterval,

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Errors surfaced by the dispatcher handle
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatcher task panicked: {0}")]
    TaskPanicked(String),
}
