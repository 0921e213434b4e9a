//! # Error Definitions
//!
//! Every way a bridged call can fail, on either side of the boundary.
//!
//! Failures produced on the remote side travel as a `neowire::Failure` and are
//! turned back into the matching variant here, so a caller sees the same
//! `ServiceClosed` whether the local guard or the remote one tripped.

use neowire::CallbackRef;
use neowire::Failure;
use neowire::FailureKind;

use crate::channel::TransportError;

#[derive(Debug, Clone)]
pub enum Error {
    /// An argument or result could not be encoded or decoded.
    Serialization(String),
    /// The function index is outside the callee's function table.
    UnknownFunctionIndex { service: String, index: u32, table_len: usize },
    /// The two ends disagree on the interface (table size, signature text, call shape).
    ProtocolMismatch { service: String, detail: String },
    /// The service instance is closed.
    ServiceClosed(String),
    /// A declared type has no registered or derivable serializer.
    UnresolvedType(String),
    /// No service instance is bound under this name.
    UnknownService(String),
    /// A service instance is already bound under this name.
    DuplicateService(String),
    /// A suspend callback was fulfilled twice, or was never registered.
    CallbackViolation { callback: CallbackRef, detail: String },
    /// The call was cancelled before it produced a result.
    Cancelled,
    /// The call channel failed.
    Transport(TransportError),
    /// The peer sent bytes that are not a valid frame.
    Wire(neowire::Error),
    /// The implementation returned an error.
    Application(String),
    /// The implementation panicked.
    Trapped(String),
    /// No async runtime is available to run a suspending call.
    NoRuntime(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::UnknownFunctionIndex { service, index, table_len } => write!(
                f,
                "Unknown function index {} for service '{}' (table has {} entries)",
                index, service, table_len
            ),
            Self::ProtocolMismatch { service, detail } => {
                write!(f, "Protocol mismatch for service '{}': {}", service, detail)
            }
            Self::ServiceClosed(service) => write!(f, "Service '{}' is closed", service),
            Self::UnresolvedType(ty) => write!(f, "No serializer for type '{}'", ty),
            Self::UnknownService(service) => write!(f, "No service bound as '{}'", service),
            Self::DuplicateService(service) => write!(f, "A service is already bound as '{}'", service),
            Self::CallbackViolation { callback, detail } => {
                write!(f, "Callback violation on {}: {}", callback, detail)
            }
            Self::Cancelled => write!(f, "Call cancelled"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Application(msg) => write!(f, "Application error: {}", msg),
            Self::Trapped(msg) => write!(f, "Implementation panicked: {}", msg),
            Self::NoRuntime(what) => write!(f, "No async runtime to run {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<neowire::Error> for Error {
    fn from(e: neowire::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Application(format!("{:#}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Describes this error for the wire.
    pub fn to_failure(&self) -> Failure {
        match self {
            Self::Serialization(msg) => Failure::new(FailureKind::Serialization, msg.clone()),
            Self::UnknownFunctionIndex { service, index, table_len } => {
                Failure::new(FailureKind::UnknownFunction, self.to_string())
                    .with_service(service.clone())
                    .with_function(*index)
                    .with_table_len(*table_len as u32)
            }
            Self::ProtocolMismatch { service, detail } => {
                Failure::new(FailureKind::ProtocolMismatch, detail.clone()).with_service(service.clone())
            }
            Self::ServiceClosed(service) => {
                Failure::new(FailureKind::ServiceClosed, self.to_string()).with_service(service.clone())
            }
            Self::UnknownService(service) => {
                Failure::new(FailureKind::UnknownService, self.to_string()).with_service(service.clone())
            }
            Self::CallbackViolation { .. } => Failure::new(FailureKind::CallbackViolation, self.to_string()),
            Self::Cancelled => Failure::new(FailureKind::Cancelled, self.to_string()),
            Self::Application(msg) => Failure::new(FailureKind::Application, msg.clone()),
            Self::Trapped(msg) => Failure::new(FailureKind::Trapped, msg.clone()),
            Self::NoRuntime(_) => Failure::new(FailureKind::Application, self.to_string()),
            // Local-only conditions reach the peer as a protocol problem.
            Self::UnresolvedType(_)
            | Self::DuplicateService(_)
            | Self::Transport(_)
            | Self::Wire(_) => Failure::new(FailureKind::ProtocolMismatch, self.to_string()),
        }
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        let service = failure.service.clone().unwrap_or_default();
        match failure.kind {
            FailureKind::Serialization => Self::Serialization(failure.message),
            FailureKind::UnknownFunction => Self::UnknownFunctionIndex {
                service,
                index: failure.function.unwrap_or(u32::MAX),
                table_len: failure.table_len.unwrap_or(0) as usize,
            },
            FailureKind::ProtocolMismatch => Self::ProtocolMismatch { service, detail: failure.message },
            FailureKind::ServiceClosed => Self::ServiceClosed(service),
            FailureKind::UnknownService => Self::UnknownService(service),
            FailureKind::CallbackViolation => Self::CallbackViolation {
                callback: CallbackRef(0),
                detail: failure.message,
            },
            FailureKind::Cancelled => Self::Cancelled,
            FailureKind::Application => Self::Application(failure.message),
            FailureKind::Trapped => Self::Trapped(failure.message),
        }
    }
}
