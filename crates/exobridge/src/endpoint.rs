//! # Endpoint
//!
//! One side of a communicating pair. An endpoint exposes local implementations
//! to its peer (`bind`), hands out proxies for the peer's services (`take`),
//! and turns every incoming frame into exactly one reply frame (`handle`).
//!
//! ## Philosophy
//!
//! - **Scoped State**: Pending continuations and running suspended calls live
//!   in the endpoint's `Link`, one per pair. Nothing is global.
//! - **Concurrent Registry**: Bound services sit in a `DashMap`; a call clones
//!   the handler out before dispatching, so implementations may re-enter the
//!   endpoint freely.

use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::DashMap;
use dashmap::DashSet;
use neowire::CallbackRef;
use neowire::CancelFrame;
use neowire::DescribeFrame;
use neowire::Failure;
use neowire::FailureKind;
use neowire::Frame;
use neowire::Outcome;
use neowire::ResponseFrame;
use neowire::ServiceSchema;
use neowire::Value;
use tokio::runtime::Handle;

use crate::channel::CallChannel;
use crate::channel::LocalChannel;
use crate::channel::TransportError;
use crate::descriptor::ServiceAdapter;
use crate::descriptor::ServiceDescriptor;
use crate::error::Error;
use crate::error::Result;
use crate::inbound::InboundHandler;
use crate::inbound::InboundService;
use crate::lifecycle::LifecycleGuard;
use crate::outbound::OutboundCallHandler;
use crate::serializer::SerializersModule;
use crate::suspend::PendingCallbacks;
use crate::suspend::RunningCalls;

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Compare function tables with the peer before the first call on a proxy.
    pub verify_signatures: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self { verify_signatures: true }
    }
}

/// The state an endpoint shares with its proxies and in-flight calls.
pub struct Link {
    name: String,
    channel: OnceLock<Arc<dyn CallChannel>>,
    pub(crate) callbacks: PendingCallbacks,
    pub(crate) running: RunningCalls,
    config: EndpointConfig,
    runtime: Option<Handle>,
}

impl Link {
    fn new(name: String, config: EndpointConfig, runtime: Option<Handle>) -> Self {
        Self {
            name,
            channel: OnceLock::new(),
            callbacks: PendingCallbacks::new(),
            running: RunningCalls::new(),
            config,
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn running_calls(&self) -> usize {
        self.running.len()
    }

    fn channel(&self) -> Result<&Arc<dyn CallChannel>> {
        self.channel
            .get()
            .ok_or_else(|| Error::Transport(TransportError::ConnectionLost(format!("endpoint '{}' is not connected", self.name))))
    }

    /// Sends a frame and decodes the peer's reply.
    pub(crate) fn exchange(&self, frame: &Frame) -> Result<Outcome> {
        let bytes = frame.encode()?;
        let reply = self.channel()?.call(&bytes)?;
        match Frame::decode(&reply)? {
            Frame::Response(response) => Ok(response.into_outcome()?),
            other => Err(Error::Wire(neowire::Error::ProtocolViolation(format!(
                "expected a response to {}, got {}",
                frame.kind(),
                other.kind()
            )))),
        }
    }

    /// Fetches the function table of a service bound on the peer.
    pub(crate) fn describe(&self, service: &str) -> Result<ServiceSchema> {
        let frame = Frame::Describe(DescribeFrame { service: service.to_string() });
        match self.exchange(&frame)? {
            Outcome::Ok(value) => serde_json::from_value(value).map_err(|e| {
                Error::Wire(neowire::Error::ProtocolViolation(format!("bad schema for '{}': {}", service, e)))
            }),
            Outcome::Err(failure) => Err(Error::from(failure)),
        }
    }

    /// Delivers the result of an inbound suspending call to the caller.
    pub(crate) fn send_response(&self, callback: CallbackRef, outcome: Outcome) {
        let frame = Frame::Response(ResponseFrame::new(Some(callback), outcome));
        match self.exchange(&frame) {
            Ok(Outcome::Ok(_)) => tracing::debug!(endpoint = %self.name, %callback, "delivered suspended result"),
            Ok(Outcome::Err(failure)) => {
                tracing::warn!(endpoint = %self.name, %callback, %failure, "peer rejected suspended result")
            }
            Err(e) => tracing::warn!(endpoint = %self.name, %callback, error = %e, "could not deliver suspended result"),
        }
    }

    /// Cancels an outbound suspending call that is still waiting.
    pub(crate) fn cancel_outbound(&self, callback: CallbackRef) {
        if !self.callbacks.cancel(callback) {
            return;
        }
        match self.exchange(&Frame::Cancel(CancelFrame { callback })) {
            Ok(Outcome::Ok(Value::Bool(true))) => {
                // The peer stopped the call; no result will come.
                self.callbacks.forget(callback);
                tracing::debug!(endpoint = %self.name, %callback, "cancelled suspending call");
            }
            Ok(_) => tracing::debug!(endpoint = %self.name, %callback, "cancel lost the race, result will be dropped"),
            Err(e) => {
                self.callbacks.forget(callback);
                tracing::debug!(endpoint = %self.name, %callback, error = %e, "could not send cancellation");
            }
        }
    }

    pub(crate) fn spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::NoRuntime(format!("suspending calls on endpoint '{}'", self.name)))?;
        runtime.spawn(task);
        Ok(())
    }
}

/// Fluent builder for an `Endpoint`.
pub struct EndpointBuilder {
    name: String,
    config: EndpointConfig,
    serializers: Option<SerializersModule>,
    runtime: Option<Handle>,
}

impl EndpointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: EndpointConfig::default(),
            serializers: None,
            runtime: None,
        }
    }

    pub fn verify_signatures(mut self, verify: bool) -> Self {
        self.config.verify_signatures = verify;
        self
    }

    /// Serializers shared by every adapter bound or taken on this endpoint.
    /// Defaults to the builtins.
    pub fn serializers(mut self, module: SerializersModule) -> Self {
        self.serializers = Some(module);
        self
    }

    pub fn configure_serializers(mut self, f: impl FnOnce(&mut SerializersModule)) -> Self {
        let module = self.serializers.get_or_insert_with(SerializersModule::with_builtins);
        f(module);
        self
    }

    /// The runtime suspending implementations run on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Arc<Endpoint> {
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            tracing::warn!(endpoint = %self.name, "no tokio runtime, suspending services cannot run here");
        }
        Arc::new(Endpoint {
            link: Arc::new(Link::new(self.name, self.config, runtime)),
            serializers: self.serializers.unwrap_or_else(SerializersModule::with_builtins),
            inbound: DashMap::new(),
            retired: DashSet::new(),
            outbound: DashMap::new(),
            guard: LifecycleGuard::new(),
        })
    }
}

pub struct Endpoint {
    link: Arc<Link>,
    serializers: SerializersModule,
    inbound: DashMap<String, Arc<dyn InboundHandler>>,
    /// Names whose service was unbound. Calls to them answer `service-closed`.
    retired: DashSet<String>,
    outbound: DashMap<String, LifecycleGuard>,
    guard: LifecycleGuard,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Sets the channel outbound frames travel on. Can only be done once.
    pub fn connect(&self, channel: Arc<dyn CallChannel>) -> Result<()> {
        self.link.channel.set(channel).map_err(|_| {
            Error::Transport(TransportError::Io(format!("endpoint '{}' is already connected", self.name())))
        })
    }

    /// Connects two in-process endpoints to each other.
    pub fn pair(a: &Arc<Endpoint>, b: &Arc<Endpoint>) -> Result<()> {
        a.connect(Arc::new(LocalChannel::new(Arc::downgrade(b))))?;
        b.connect(Arc::new(LocalChannel::new(Arc::downgrade(a))))?;
        Ok(())
    }

    /// Exposes `service` to the peer under `name`.
    ///
    /// # Errors
    /// - `UnresolvedType` if the adapter's function table cannot be built.
    /// - `DuplicateService` if `name` is taken.
    pub fn bind<A: ServiceAdapter>(&self, name: &str, adapter: &A, service: Arc<A::Service>) -> Result<()> {
        self.guard.check(self.name())?;
        let descriptor = Arc::new(ServiceDescriptor::build(adapter, &self.serializers)?);

        match self.inbound.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateService(name.to_string())),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                tracing::debug!(
                    endpoint = %self.name(),
                    service = name,
                    serial_name = descriptor.serial_name(),
                    functions = descriptor.len(),
                    "bound service"
                );
                v.insert(Arc::new(InboundService::new(name, service, descriptor)));
                self.retired.remove(name);
                Ok(())
            }
        }
    }

    /// Returns a proxy for the peer's service bound under `name`.
    ///
    /// Proxies taken under the same name share one lifecycle guard until it closes.
    pub fn take<A: ServiceAdapter>(&self, name: &str, adapter: &A) -> Result<Arc<A::Service>> {
        self.guard.check(self.name())?;
        let descriptor = Arc::new(ServiceDescriptor::build(adapter, &self.serializers)?);

        let guard = {
            let mut entry = self.outbound.entry(name.to_string()).or_default();
            if entry.is_closed() {
                *entry = LifecycleGuard::new();
            }
            entry.clone()
        };

        let handler = OutboundCallHandler::new(name, descriptor, self.link.clone(), guard);
        Ok(adapter.outbound_service(handler))
    }

    /// Removes and closes the service bound under `name`.
    ///
    /// Until a new service is bound under the same name, the peer's calls to
    /// it fail with `service-closed`.
    pub fn unbind(&self, name: &str) -> Result<()> {
        let (_, handler) = self
            .inbound
            .remove(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        self.retired.insert(name.to_string());
        handler.close();
        tracing::debug!(endpoint = %self.name(), service = name, "unbound service");
        Ok(())
    }

    /// Fetches the function table of the peer's service bound under `name`.
    pub fn remote_schema(&self, name: &str) -> Result<ServiceSchema> {
        self.link.describe(name)
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inbound.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }

    /// Tears the endpoint down.
    ///
    /// Closes every bound service and every proxy guard, stops running
    /// suspended calls (answering their callers with `service-closed`) and
    /// resumes every pending continuation with `service-closed`.
    pub fn close(&self) {
        if !self.guard.close() {
            return;
        }
        tracing::debug!(endpoint = %self.name(), "closing endpoint");

        // Implementations may re-enter the endpoint from `close`.
        let handlers: Vec<Arc<dyn InboundHandler>> = self.inbound.iter().map(|e| e.value().clone()).collect();
        for handler in handlers {
            handler.close();
        }
        for entry in self.outbound.iter() {
            entry.value().close();
        }
        let failure = Failure::new(FailureKind::ServiceClosed, format!("endpoint '{}' closed", self.name()))
            .with_service(self.name());
        // Callers of interrupted suspended calls still get an answer.
        for callback in self.link.running.cancel_all() {
            self.link.send_response(callback, Outcome::Err(failure.clone()));
        }
        self.link.callbacks.fail_all(&failure);
    }

    /// Handles one incoming frame and returns the reply frame.
    pub fn handle(&self, bytes: &[u8]) -> Vec<u8> {
        let outcome = match Frame::decode(bytes) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => self.handle_malformed(bytes, e),
        };

        match Frame::Response(ResponseFrame::new(None, outcome)).encode() {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(endpoint = %self.name(), error = %e, "failed to encode reply");
                Vec::new()
            }
        }
    }

    fn handle_frame(&self, frame: Frame) -> Outcome {
        match frame {
            Frame::Call(call) => {
                tracing::debug!(
                    endpoint = %self.name(),
                    service = %call.service,
                    function = call.function,
                    callback = ?call.callback,
                    "inbound call"
                );
                match self.lookup(&call.service) {
                    Ok(handler) => handler.dispatch(call.function, call.args, call.callback, &self.link),
                    Err(e) => Outcome::Err(e.to_failure()),
                }
            }
            Frame::Response(response) => {
                let Some(callback) = response.callback else {
                    tracing::error!(endpoint = %self.name(), "response frame without callback");
                    return Outcome::Err(
                        Error::Wire(neowire::Error::ProtocolViolation("unsolicited response without callback".into()))
                            .to_failure(),
                    );
                };
                let outcome = response
                    .into_outcome()
                    .unwrap_or_else(|e| Outcome::Err(Error::Wire(e).to_failure()));
                match self.link.callbacks.fulfill(callback, outcome) {
                    Ok(()) => Outcome::ack(),
                    Err(e) => {
                        tracing::error!(endpoint = %self.name(), %callback, error = %e, "protocol violation");
                        Outcome::Err(e.to_failure())
                    }
                }
            }
            Frame::Cancel(cancel) => {
                let won = self.link.running.cancel(cancel.callback);
                tracing::debug!(endpoint = %self.name(), callback = %cancel.callback, won, "cancel request");
                Outcome::Ok(Value::Bool(won))
            }
            Frame::Describe(describe) => match self.lookup(&describe.service) {
                Ok(handler) => match serde_json::to_value(handler.schema()) {
                    Ok(schema) => Outcome::Ok(schema),
                    Err(e) => Outcome::Err(Error::Serialization(e.to_string()).to_failure()),
                },
                Err(e) => Outcome::Err(e.to_failure()),
            },
        }
    }

    /// Replies to bytes that are not a frame. A malformed response still
    /// settles its continuation when the callback can be recovered.
    fn handle_malformed(&self, bytes: &[u8], error: neowire::Error) -> Outcome {
        tracing::error!(endpoint = %self.name(), error = %error, "malformed frame");
        let failure = Error::Wire(error).to_failure();

        let is_response = serde_json::from_slice::<Value>(bytes)
            .map(|raw| raw.get("type").and_then(Value::as_str) == Some("response"))
            .unwrap_or(false);
        if is_response {
            if let Ok(Some(callback)) = neowire::decode_callback(bytes) {
                if let Err(e) = self.link.callbacks.fulfill(callback, Outcome::Err(failure.clone())) {
                    tracing::error!(endpoint = %self.name(), %callback, error = %e, "protocol violation");
                }
            }
        }

        Outcome::Err(failure)
    }

    fn lookup(&self, service: &str) -> Result<Arc<dyn InboundHandler>> {
        if let Some(handler) = self.inbound.get(service) {
            return Ok(handler.value().clone());
        }
        if self.retired.contains(service) {
            return Err(Error::ServiceClosed(service.to_string()));
        }
        Err(Error::UnknownService(service.to_string()))
    }
}

impl CallChannel for Endpoint {
    fn call(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        Ok(self.handle(payload))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}
