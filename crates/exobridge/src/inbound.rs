//! # Inbound Dispatcher
//!
//! Owns a real implementation and runs calls against it by function index.
//!
//! ## Invariants
//! - **Guard First**: The lifecycle check precedes everything else. `close` on
//!   a closed instance is a no-op success; any other call fails.
//! - **No Local Crash**: Decoding errors, implementation errors and panics all
//!   become a `Failure` outcome.
//! - **Never Blocks On Suspension**: A suspending call is spawned and
//!   acknowledged at once; its result travels back later under the caller's callback.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use futures::FutureExt;
use neowire::CallbackRef;
use neowire::Outcome;
use neowire::ServiceSchema;
use neowire::Value;

use crate::descriptor::BridgeService;
use crate::descriptor::FunctionEntry;
use crate::descriptor::Invoke;
use crate::descriptor::ServiceDescriptor;
use crate::endpoint::Link;
use crate::error::Error;
use crate::error::Result;
use crate::lifecycle::LifecycleGuard;

/// A bound service as the endpoint sees it, with the implementation type erased.
pub trait InboundHandler: Send + Sync {
    fn dispatch(&self, function: u32, args: Vec<Value>, callback: Option<CallbackRef>, link: &Arc<Link>) -> Outcome;
    fn schema(&self) -> ServiceSchema;
    /// Closes the instance, calling the implementation's `close` once.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub struct InboundService<S: ?Sized> {
    name: String,
    service: Arc<S>,
    descriptor: Arc<ServiceDescriptor<S>>,
    guard: LifecycleGuard,
}

impl<S: ?Sized + BridgeService + 'static> InboundService<S> {
    pub fn new(name: impl Into<String>, service: Arc<S>, descriptor: Arc<ServiceDescriptor<S>>) -> Self {
        Self {
            name: name.into(),
            service,
            descriptor,
            guard: LifecycleGuard::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor<S>> {
        &self.descriptor
    }

    fn try_dispatch(
        &self,
        function: u32,
        args: Vec<Value>,
        callback: Option<CallbackRef>,
        link: &Arc<Link>,
    ) -> Result<Outcome> {
        let is_close = function == self.descriptor.close_index();
        if self.guard.is_closed() {
            if is_close {
                return Ok(Outcome::ack());
            }
            return Err(Error::ServiceClosed(self.name.clone()));
        }

        let entry = self.descriptor.function(function)?;
        self.check_shape(entry, args.len(), callback)?;
        let args = entry.decode_args(args)?;

        match entry.invoke() {
            Invoke::Returning(invoke) => {
                if is_close && !self.guard.close() {
                    return Ok(Outcome::ack());
                }
                let value = catch_unwind(AssertUnwindSafe(|| invoke(&*self.service, args)))
                    .map_err(|panic| Error::Trapped(panic_message(&*panic)))??;
                Ok(Outcome::Ok(entry.result_serializer().encode(&*value)?))
            }
            Invoke::Suspending(invoke) => {
                let callback = callback.ok_or_else(|| Error::ProtocolMismatch {
                    service: self.descriptor.serial_name().to_string(),
                    detail: format!("`{}` is suspending but the call has no callback", entry.signature()),
                })?;
                let cancelled = link.running.begin(callback)?;
                let call = match catch_unwind(AssertUnwindSafe(|| invoke(self.service.clone(), args))) {
                    Ok(call) => call,
                    Err(panic) => {
                        link.running.finish(callback);
                        return Err(Error::Trapped(panic_message(&*panic)));
                    }
                };
                let result = entry.result_serializer().clone();
                let task_link = link.clone();
                let service = self.name.clone();
                let signature = entry.signature().clone();

                let task = async move {
                    let completed = tokio::select! {
                        done = AssertUnwindSafe(call).catch_unwind() => Some(done),
                        _ = cancelled => None,
                    };
                    let Some(done) = completed else {
                        tracing::debug!(%service, %signature, %callback, "suspending call cancelled");
                        return;
                    };
                    if !task_link.running.finish(callback) {
                        tracing::debug!(%service, %signature, %callback, "cancelled after completion, result dropped");
                        return;
                    }

                    let outcome = match done {
                        Ok(Ok(value)) => match result.encode(&*value) {
                            Ok(value) => Outcome::Ok(value),
                            Err(e) => Outcome::Err(e.to_failure()),
                        },
                        Ok(Err(e)) => Outcome::Err(e.to_failure()),
                        Err(panic) => Outcome::Err(Error::Trapped(panic_message(&*panic)).to_failure()),
                    };
                    task_link.send_response(callback, outcome);
                };

                if let Err(e) = link.spawn(task) {
                    link.running.finish(callback);
                    return Err(e);
                }
                Ok(Outcome::ack())
            }
        }
    }

    fn check_shape(&self, entry: &FunctionEntry<S>, arg_count: usize, callback: Option<CallbackRef>) -> Result<()> {
        let mismatch = |detail: String| Error::ProtocolMismatch {
            service: self.descriptor.serial_name().to_string(),
            detail,
        };

        match (entry.is_suspending(), callback) {
            (true, None) => return Err(mismatch(format!("`{}` is suspending but the call has no callback", entry.signature()))),
            (false, Some(callback)) => {
                return Err(mismatch(format!("`{}` is not suspending but the call carries {}", entry.signature(), callback)));
            }
            _ => {}
        }

        let expected = entry.arg_serializers().len();
        if arg_count != expected {
            return Err(mismatch(format!("`{}` takes {} arguments, the call carries {}", entry.signature(), expected, arg_count)));
        }
        Ok(())
    }
}

impl<S: ?Sized + BridgeService + 'static> InboundHandler for InboundService<S> {
    fn dispatch(&self, function: u32, args: Vec<Value>, callback: Option<CallbackRef>, link: &Arc<Link>) -> Outcome {
        match self.try_dispatch(function, args, callback, link) {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    Error::ServiceClosed(_) => tracing::warn!(service = %self.name, function, "call on closed service"),
                    Error::UnknownFunctionIndex { .. } | Error::ProtocolMismatch { .. } => {
                        tracing::error!(service = %self.name, function, error = %e, "rejected call")
                    }
                    _ => tracing::debug!(service = %self.name, function, error = %e, "call failed"),
                }
                Outcome::Err(e.to_failure())
            }
        }
    }

    fn schema(&self) -> ServiceSchema {
        self.descriptor.schema()
    }

    fn close(&self) {
        if !self.guard.close() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| self.service.close())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(service = %self.name, error = %e, "close failed"),
            Err(panic) => tracing::warn!(service = %self.name, panic = %panic_message(&*panic), "close panicked"),
        }
    }

    fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
