//! # NeoWire
//!
//! The wire contract of the service bridge.
//!
//! ## Architecture
//!
//! Frames are JSON documents tagged by `type`. Arguments and results are carried
//! as already-serialized `serde_json::Value`s; this crate never interprets them.
//! Type knowledge lives on both ends of the bridge, in identically built
//! function tables, which is why a call can address its target by index.

pub mod error;
pub mod frame;

pub use error::Error;
pub use error::Failure;
pub use error::FailureKind;
pub use error::Result;
pub use frame::CallFrame;
pub use frame::CallbackRef;
pub use frame::CancelFrame;
pub use frame::DescribeFrame;
pub use frame::Frame;
pub use frame::Outcome;
pub use frame::ResponseFrame;
pub use frame::ServiceSchema;
pub use frame::Status;
pub use frame::decode_callback;

pub use serde_json::Value;
