//! # Call Channel
//!
//! A minimal, synchronous interface for moving frames between the two ends of
//! a bridge.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The channel knows nothing about frames or services.
//!   It moves opaque buffers.
//! - **Request-Response**: Every frame gets exactly one reply frame. Suspending
//!   calls are built on top of this as two independent exchanges, never as a
//!   long-lived request.

use std::fmt;
use std::sync::Weak;

use crate::endpoint::Endpoint;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is unreachable or has been dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A reliable, ordered channel that sends a frame and returns the reply frame.
///
/// # Invariants
/// - Must return `Ok(bytes)` with the raw reply on success.
/// - Must not interpret the payload.
/// - Must deliver frames in the order `call` is invoked from a single thread.
pub trait CallChannel: Send + Sync + 'static {
    fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Delivers frames directly into another endpoint in the same process.
///
/// The target is held weakly, so a pair of endpoints connected to each other
/// does not keep itself alive.
pub struct LocalChannel {
    target: Weak<Endpoint>,
}

impl LocalChannel {
    pub fn new(target: Weak<Endpoint>) -> Self {
        Self { target }
    }
}

impl CallChannel for LocalChannel {
    fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let endpoint = self
            .target
            .upgrade()
            .ok_or_else(|| TransportError::ConnectionLost("peer endpoint dropped".into()))?;
        Ok(endpoint.handle(payload))
    }
}
