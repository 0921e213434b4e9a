//! # ExoBridge
//!
//! Calls a service interface implemented on the other side of an isolation
//! boundary as if it were local.
//!
//! An interface is described once by a `ServiceAdapter`. From it both ends
//! build the same `ServiceDescriptor`, so a function index is enough to name a
//! method on the wire. The side that owns the implementation `bind`s it to an
//! `Endpoint`; the other side `take`s a proxy that implements the same trait.
//! Ordinary methods block until their response arrives; suspending methods
//! return a future that is resumed by a later, independent response.

pub mod channel;
pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod inbound;
pub mod lifecycle;
pub mod outbound;
pub mod serializer;
pub mod signature;
pub mod suspend;
pub mod types;

pub use channel::CallChannel;
pub use channel::LocalChannel;
pub use channel::TransportError;
pub use descriptor::Args;
pub use descriptor::BridgeService;
pub use descriptor::FunctionDecl;
pub use descriptor::FunctionEntry;
pub use descriptor::ServiceAdapter;
pub use descriptor::ServiceDescriptor;
pub use endpoint::Endpoint;
pub use endpoint::EndpointBuilder;
pub use endpoint::EndpointConfig;
pub use error::Error;
pub use error::Result;
pub use lifecycle::LifecycleGuard;
pub use outbound::OutboundCallHandler;
pub use serializer::AnyValue;
pub use serializer::Serializer;
pub use serializer::SerializersModule;
pub use serializer::pack;
pub use signature::FunctionSignature;
pub use suspend::SuspendCall;
pub use types::Portable;
pub use types::TypeBindings;
pub use types::TypeRef;

pub use async_trait::async_trait;
