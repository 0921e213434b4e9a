//! # Outbound Call Handler
//!
//! What a proxy delegates to. Each proxy method knows its fixed function index
//! and hands its arguments here; the handler encodes them with the entry's
//! serializers, sends the call and decodes the outcome.
//!
//! ## Invariants
//! - **Fail Fast When Closed**: The lifecycle check is the first thing every
//!   call does. A closed guard never reaches the channel.
//! - **Optimistic Close**: `close()` closes the local guard before notifying
//!   the remote side. The notice is sent again on a later `close()` until
//!   the remote side has acknowledged it.
//! - **Checked Once**: With signature verification enabled, the remote table
//!   is compared before the first call; a definitive verdict is cached.

use std::any::Any;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use neowire::CallFrame;
use neowire::Frame;
use neowire::Outcome;
use neowire::Value;

use crate::channel::TransportError;
use crate::descriptor::FunctionEntry;
use crate::descriptor::ServiceDescriptor;
use crate::endpoint::Link;
use crate::error::Error;
use crate::error::Result;
use crate::lifecycle::LifecycleGuard;
use crate::suspend::SuspendCall;

pub struct OutboundCallHandler<S: ?Sized> {
    service_name: String,
    descriptor: Arc<ServiceDescriptor<S>>,
    link: Arc<Link>,
    guard: LifecycleGuard,
    /// Set once the remote instance is known to be closed.
    released: AtomicBool,
    compatibility: OnceLock<Result<()>>,
}

impl<S: ?Sized> OutboundCallHandler<S> {
    pub(crate) fn new(
        service_name: impl Into<String>,
        descriptor: Arc<ServiceDescriptor<S>>,
        link: Arc<Link>,
        guard: LifecycleGuard,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            descriptor,
            link,
            guard,
            released: AtomicBool::new(false),
            compatibility: OnceLock::new(),
        }
    }

    /// The name the remote instance is bound under.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn descriptor(&self) -> &ServiceDescriptor<S> {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }

    /// Calls the ordinary function at `index` and blocks until its result arrives.
    ///
    /// # Errors
    /// `ServiceClosed` without touching the channel if the guard is closed;
    /// otherwise any failure of encoding, transport or the remote call.
    pub fn call<R: Any>(&self, index: u32, args: &[&dyn Any]) -> Result<R> {
        let entry = self.prepare(index, false)?;
        let frame = Frame::Call(CallFrame::new(&self.service_name, index, entry.encode_args(args)?));

        tracing::debug!(service = %self.service_name, function = index, "outbound call");
        match self.exchange(&frame)? {
            Outcome::Ok(value) => decode_result(entry, value),
            Outcome::Err(failure) => Err(self.observe(Error::from(failure))),
        }
    }

    /// Starts the suspending function at `index`.
    ///
    /// The call is registered and sent before this returns; the returned
    /// future resolves when the remote side delivers the result.
    pub fn call_suspending<R: Any>(&self, index: u32, args: &[&dyn Any]) -> SuspendCall<R> {
        match self.start_suspending(index, args) {
            Ok(call) => call,
            Err(e) => SuspendCall::failed(e),
        }
    }

    fn start_suspending<R: Any>(&self, index: u32, args: &[&dyn Any]) -> Result<SuspendCall<R>> {
        let entry = self.prepare(index, true)?;
        let args = entry.encode_args(args)?;

        let (callback, rx) = self.link.callbacks.register();
        let frame = Frame::Call(CallFrame::new(&self.service_name, index, args).with_callback(callback));

        tracing::debug!(service = %self.service_name, function = index, %callback, "outbound suspending call");
        match self.exchange(&frame) {
            Ok(Outcome::Ok(_)) => Ok(SuspendCall::waiting(
                callback,
                rx,
                entry.result_serializer().clone(),
                self.link.clone(),
                self.service_name.clone(),
                self.guard.clone(),
            )),
            Ok(Outcome::Err(failure)) => {
                self.link.callbacks.forget(callback);
                Err(self.observe(Error::from(failure)))
            }
            Err(e) => {
                self.link.callbacks.forget(callback);
                Err(e)
            }
        }
    }

    /// Closes the remote instance.
    ///
    /// The local guard closes first, so concurrent and later calls fail fast.
    /// Once the remote side has acknowledged, closing again is a no-op, as is
    /// closing an instance the remote side already closed. If the remote side
    /// could not be reached, a later `close()` tries again.
    pub fn close(&self) -> Result<()> {
        self.guard.close();
        if self.released.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.notify_close() {
            Ok(()) | Err(Error::ServiceClosed(_)) | Err(Error::UnknownService(_)) => {
                self.released.store(true, Ordering::Release);
                Ok(())
            }
            Err(e @ Error::ProtocolMismatch { .. }) => {
                // The close index cannot be trusted; there is nothing to retry.
                self.released.store(true, Ordering::Release);
                Err(e)
            }
            Err(Error::Transport(TransportError::ConnectionLost(reason))) => {
                tracing::debug!(service = %self.service_name, %reason, "peer unreachable while closing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn notify_close(&self) -> Result<()> {
        self.ensure_compatible()?;

        let frame = Frame::Call(CallFrame::new(&self.service_name, self.descriptor.close_index(), Vec::new()));
        tracing::debug!(service = %self.service_name, "closing remote service");
        match self.link.exchange(&frame)? {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(failure) => Err(Error::from(failure)),
        }
    }

    fn prepare(&self, index: u32, suspending: bool) -> Result<&FunctionEntry<S>> {
        self.guard.check(&self.service_name)?;
        self.ensure_compatible().map_err(|e| self.observe(e))?;

        let entry = self.descriptor.function(index)?;
        if entry.is_suspending() != suspending {
            let kind = if entry.is_suspending() { "suspending" } else { "ordinary" };
            return Err(Error::ProtocolMismatch {
                service: self.descriptor.serial_name().to_string(),
                detail: format!("`{}` is {} and cannot be called this way", entry.signature(), kind),
            });
        }
        Ok(entry)
    }

    fn ensure_compatible(&self) -> Result<()> {
        if !self.link.config().verify_signatures {
            return Ok(());
        }
        if let Some(verdict) = self.compatibility.get() {
            return verdict.clone();
        }

        let verdict = self
            .link
            .describe(&self.service_name)
            .and_then(|schema| self.descriptor.check_compatible(&schema));
        match &verdict {
            Ok(()) => {
                let _ = self.compatibility.set(verdict.clone());
            }
            Err(e @ Error::ProtocolMismatch { .. }) => {
                tracing::error!(service = %self.service_name, error = %e, "remote service is incompatible");
                let _ = self.compatibility.set(verdict.clone());
            }
            Err(e) => {
                tracing::debug!(service = %self.service_name, error = %e, "compatibility check inconclusive");
            }
        }
        verdict
    }

    fn exchange(&self, frame: &Frame) -> Result<Outcome> {
        self.link.exchange(frame).map_err(|e| self.observe(e))
    }

    /// Closes the local guard when an error shows the remote instance is gone.
    fn observe(&self, error: Error) -> Error {
        match &error {
            Error::ServiceClosed(_) | Error::Transport(TransportError::ConnectionLost(_)) => {
                if matches!(error, Error::ServiceClosed(_)) {
                    self.released.store(true, Ordering::Release);
                }
                if self.guard.close() {
                    tracing::warn!(service = %self.service_name, error = %error, "remote service gone, closing proxy");
                }
            }
            _ => {}
        }
        error
    }
}

fn decode_result<S: ?Sized, R: Any>(entry: &FunctionEntry<S>, value: Value) -> Result<R> {
    entry
        .result_serializer()
        .decode(value)?
        .downcast::<R>()
        .map(|v| *v)
        .map_err(|_| Error::Serialization(format!("result of `{}` is not a {}", entry.signature(), std::any::type_name::<R>())))
}
