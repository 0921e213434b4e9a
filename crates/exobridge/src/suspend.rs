//! # Suspend Bridge
//!
//! A suspending call crosses the boundary as two independent exchanges: the
//! call (acknowledged immediately) and, later, a response sent back from the
//! callee and tagged with the caller's `CallbackRef`.
//!
//! ## Invariants
//! - **Register Before Send**: The continuation is registered before the call
//!   frame leaves, so a response can never arrive ahead of its slot.
//! - **Exactly Once**: A slot is removed by the first fulfillment. A second
//!   fulfillment, or one for a ref that was never registered, is a
//!   `CallbackViolation` and leaves every other slot untouched.
//! - **First Wins**: On both sides, whichever of completion or cancellation
//!   removes the entry first wins; the other becomes a no-op.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use dashmap::DashMap;
use neowire::CallbackRef;
use neowire::Failure;
use neowire::Outcome;
use tokio::sync::oneshot;

use crate::endpoint::Link;
use crate::error::Error;
use crate::error::Result;
use crate::lifecycle::LifecycleGuard;
use crate::serializer::Serializer;

enum Slot {
    Waiting(oneshot::Sender<Outcome>),
    Cancelled,
}

/// Continuations of outbound suspending calls, keyed by callback.
///
/// Scoped to one endpoint, i.e. one communicating pair.
pub struct PendingCallbacks {
    slots: DashMap<CallbackRef, Slot>,
    next: AtomicU64,
}

impl Default for PendingCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCallbacks {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh callback and the receiver its outcome will arrive on.
    pub fn register(&self) -> (CallbackRef, oneshot::Receiver<Outcome>) {
        let callback = CallbackRef(self.next.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.slots.insert(callback, Slot::Waiting(tx));
        (callback, rx)
    }

    /// Resumes the continuation registered under `callback`.
    ///
    /// A result for a cancelled call is dropped.
    ///
    /// # Errors
    /// Returns `CallbackViolation` if no continuation is registered, either
    /// because it was already fulfilled or because it never existed.
    pub fn fulfill(&self, callback: CallbackRef, outcome: Outcome) -> Result<()> {
        match self.slots.remove(&callback) {
            Some((_, Slot::Waiting(tx))) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!(%callback, "continuation dropped before its result arrived");
                }
                Ok(())
            }
            Some((_, Slot::Cancelled)) => {
                tracing::debug!(%callback, "dropping result of cancelled call");
                Ok(())
            }
            None => Err(Error::CallbackViolation {
                callback,
                detail: "no pending continuation (already fulfilled or never registered)".into(),
            }),
        }
    }

    /// Marks `callback` cancelled so a late result is dropped.
    ///
    /// Returns `false` if the result already arrived.
    pub fn cancel(&self, callback: CallbackRef) -> bool {
        match self.slots.get_mut(&callback) {
            Some(mut slot) if matches!(*slot, Slot::Waiting(_)) => {
                *slot = Slot::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Removes `callback` without resuming it.
    pub fn forget(&self, callback: CallbackRef) {
        self.slots.remove(&callback);
    }

    /// Resumes every pending continuation with `failure`.
    pub fn fail_all(&self, failure: &Failure) {
        let keys: Vec<CallbackRef> = self.slots.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, Slot::Waiting(tx))) = self.slots.remove(&key) {
                let _ = tx.send(Outcome::Err(failure.clone()));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Inbound suspending calls still running, keyed by the caller's callback.
#[derive(Default)]
pub struct RunningCalls {
    calls: DashMap<CallbackRef, oneshot::Sender<()>>,
}

impl RunningCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a running call and returns the signal that fires on cancellation.
    ///
    /// # Errors
    /// Returns `CallbackViolation` if a call is already running under `callback`.
    pub fn begin(&self, callback: CallbackRef) -> Result<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        match self.calls.entry(callback) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::CallbackViolation {
                callback,
                detail: "a call is already running under this callback".into(),
            }),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Marks the call complete. Returns `false` if it was cancelled first.
    pub fn finish(&self, callback: CallbackRef) -> bool {
        self.calls.remove(&callback).is_some()
    }

    /// Cancels the call. Returns `false` if it already completed.
    pub fn cancel(&self, callback: CallbackRef) -> bool {
        match self.calls.remove(&callback) {
            Some((_, tx)) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Cancels every running call. Returns the callbacks that were still running.
    pub fn cancel_all(&self) -> Vec<CallbackRef> {
        let keys: Vec<CallbackRef> = self.calls.iter().map(|e| *e.key()).collect();
        keys.into_iter().filter(|key| self.cancel(*key)).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

enum State {
    Failed(Error),
    Waiting {
        callback: CallbackRef,
        rx: oneshot::Receiver<Outcome>,
        result: Arc<dyn Serializer>,
        link: Arc<Link>,
        service: String,
        guard: LifecycleGuard,
    },
    Done,
}

/// The pending result of an outbound suspending call.
///
/// Dropping it before it completes sends a best-effort cancellation notice.
#[must_use = "a suspending call is cancelled when dropped"]
pub struct SuspendCall<R> {
    state: State,
    _marker: PhantomData<fn() -> R>,
}

impl<R> SuspendCall<R> {
    pub(crate) fn waiting(
        callback: CallbackRef,
        rx: oneshot::Receiver<Outcome>,
        result: Arc<dyn Serializer>,
        link: Arc<Link>,
        service: String,
        guard: LifecycleGuard,
    ) -> Self {
        Self {
            state: State::Waiting { callback, rx, result, link, service, guard },
            _marker: PhantomData,
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        Self {
            state: State::Failed(error),
            _marker: PhantomData,
        }
    }

    /// The callback this call waits on, if it reached the remote side.
    pub fn callback(&self) -> Option<CallbackRef> {
        match &self.state {
            State::Waiting { callback, .. } => Some(*callback),
            _ => None,
        }
    }
}

impl<R: Any> Future for SuspendCall<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, State::Done) {
            State::Failed(e) => Poll::Ready(Err(e)),
            State::Waiting { callback, mut rx, result, link, service, guard } => match Pin::new(&mut rx).poll(cx) {
                Poll::Pending => {
                    this.state = State::Waiting { callback, rx, result, link, service, guard };
                    Poll::Pending
                }
                Poll::Ready(received) => Poll::Ready(settle(callback, received, &*result, &service, &guard)),
            },
            State::Done => panic!("SuspendCall polled after completion"),
        }
    }
}

fn settle<R: Any>(
    callback: CallbackRef,
    received: std::result::Result<Outcome, oneshot::error::RecvError>,
    result: &dyn Serializer,
    service: &str,
    guard: &LifecycleGuard,
) -> Result<R> {
    let outcome = received.map_err(|_| Error::ServiceClosed(service.to_string()))?;
    match outcome {
        Outcome::Ok(value) => {
            let value = result.decode(value)?;
            value
                .downcast::<R>()
                .map(|v| *v)
                .map_err(|_| Error::Serialization(format!("result of {} is not a {}", callback, result.type_ref())))
        }
        Outcome::Err(failure) => {
            let error = Error::from(failure);
            if matches!(error, Error::ServiceClosed(_)) {
                guard.close();
            }
            Err(error)
        }
    }
}

impl<R> Drop for SuspendCall<R> {
    fn drop(&mut self) {
        if let State::Waiting { callback, link, .. } = &self.state {
            link.cancel_outbound(*callback);
        }
    }
}
