//! # Error Definitions
//!
//! Failures of the wire layer itself, and the description of a remote failure
//! that travels inside an error `Response`.

use serde::Deserialize;
use serde::Serialize;

/// Operational failures while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The bytes are not a frame: bad JSON, unknown frame type, or a missing field.
    Malformed(String),
    /// The frame decoded, but its contents break the protocol (e.g. an error
    /// response whose value is not a failure description).
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a failed call (the "error" side of a Response).
///
/// These describe the *remote* side failing to produce a result, whereas
/// `Error` describes bytes that could not be understood at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// An argument or result could not be encoded or decoded.
    Serialization,
    /// The function index is outside the callee's function table.
    UnknownFunction,
    /// The two ends were built from different interface declarations.
    ProtocolMismatch,
    /// The target service instance is closed.
    ServiceClosed,
    /// No service instance is bound under the requested name.
    UnknownService,
    /// A suspend callback was fulfilled twice or was never registered.
    CallbackViolation,
    /// The call was cancelled before it produced a result.
    Cancelled,
    /// The implementation returned an error.
    Application,
    /// The implementation panicked.
    Trapped,
}

impl FailureKind {
    /// Returns the wire tag of this kind.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Serialization => "serialization",
            Self::UnknownFunction => "unknown-function",
            Self::ProtocolMismatch => "protocol-mismatch",
            Self::ServiceClosed => "service-closed",
            Self::UnknownService => "unknown-service",
            Self::CallbackViolation => "callback-violation",
            Self::Cancelled => "cancelled",
            Self::Application => "application",
            Self::Trapped => "trapped",
        }
    }
}

/// Serialized description of a failed call.
///
/// The optional fields carry enough context to diagnose version skew between
/// two independently built adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_len: Option<u32>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            service: None,
            function: None,
            table_len: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_function(mut self, function: u32) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_table_len(mut self, table_len: u32) -> Self {
        self.table_len = Some(table_len);
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_tag(), self.message)
    }
}
