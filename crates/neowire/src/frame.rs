//! # Protocol Frames
//!
//! Defines the envelopes that cross the boundary: calls, responses, cancellation
//! notices and schema requests.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown fields are ignored; unknown frame types are rejected.
//! - **Index Addressing**: A call names its function by position in the callee's
//!   function table, never by name.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;

/// Identifies where the eventual result of a suspending call must be delivered.
///
/// Allocated by the caller, unique per communicating pair.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackRef(pub u64);

impl std::fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "callback-{}", self.0)
    }
}

/// Top-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Call(CallFrame),
    Response(ResponseFrame),
    Cancel(CancelFrame),
    Describe(DescribeFrame),
}

impl Frame {
    /// Encodes this frame into bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a frame from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short name of the frame type, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Response(_) => "response",
            Self::Cancel(_) => "cancel",
            Self::Describe(_) => "describe",
        }
    }
}

/// An outbound invocation of function `function` on service instance `service`.
///
/// `callback` is present only for suspending functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub service: String,
    pub function: u32,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackRef>,
}

impl CallFrame {
    pub fn new(service: impl Into<String>, function: u32, args: Vec<Value>) -> Self {
        Self {
            service: service.into(),
            function,
            args,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: CallbackRef) -> Self {
        self.callback = Some(callback);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// The result of a call, as it travels on the wire.
///
/// On `Status::Error` the value holds a serialized `Failure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackRef>,
    pub status: Status,
    #[serde(default)]
    pub value: Value,
}

impl ResponseFrame {
    pub fn new(callback: Option<CallbackRef>, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Self { callback, status: Status::Ok, value },
            Outcome::Err(failure) => Self {
                callback,
                status: Status::Error,
                // A Failure is plain data; serializing it cannot fail.
                value: serde_json::to_value(&failure).unwrap_or(Value::Null),
            },
        }
    }

    /// Splits the frame into its callback and outcome.
    ///
    /// # Errors
    /// Returns `Error::ProtocolViolation` if an error response does not carry a `Failure`.
    pub fn into_outcome(self) -> Result<Outcome> {
        match self.status {
            Status::Ok => Ok(Outcome::Ok(self.value)),
            Status::Error => serde_json::from_value::<Failure>(self.value)
                .map(Outcome::Err)
                .map_err(|e| Error::ProtocolViolation(format!("error response without failure: {}", e))),
        }
    }
}

/// Best-effort notice that the caller no longer wants the result of `callback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelFrame {
    pub callback: CallbackRef,
}

/// Request for the function table of a bound service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeFrame {
    pub service: String,
}

/// Success value or failure description of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Err(Failure),
}

impl Outcome {
    /// The acknowledgement returned for frames that carry no result.
    pub fn ack() -> Self {
        Self::Ok(Value::Null)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

impl From<std::result::Result<Value, Failure>> for Outcome {
    fn from(r: std::result::Result<Value, Failure>) -> Self {
        match r {
            Ok(v) => Self::Ok(v),
            Err(f) => Self::Err(f),
        }
    }
}

/// The function table of a service as exchanged for compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSchema {
    pub serial_name: String,
    pub signatures: Vec<String>,
}

/// Decodes just the callback reference from a raw frame.
///
/// This is useful for settling a pending continuation when the full decoding
/// fails. Returns `Ok(None)` if the frame carries no callback.
pub fn decode_callback(bytes: &[u8]) -> Result<Option<CallbackRef>> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value.get("callback") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_value(raw.clone())?)),
    }
}
