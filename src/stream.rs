//! Single-value broadcast streams.
//!
//! A [`MutableStream`] holds exactly one current value. Consumers get a
//! [`ReadOnlyStream`] and either read the value or subscribe to it:
//!
//! - [`ReadOnlyStream::subscribe`] delivers the current value synchronously,
//!   then every later update in the order it was issued.
//! - [`ReadOnlyStream::updates`] does the same through an async `Stream`.
//!
//! The stream keeps only a `Weak` handle to each subscriber callback. The
//! returned [`Subscription`] owns the callback, so dropping it (or whatever
//! owns it) ends delivery and frees the callback. There is no history: a
//! late subscriber starts from the latest value.
//!
//! # Invariants
//!
//! 1. Updates are applied and delivered in issue order.
//! 2. A subscriber never receives a value older than one it already saw.
//! 3. Only the owner of the `MutableStream` can update it.

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    callback: Callback<T>,
    /// Version of the last value handed to `callback`.
    delivered: Mutex<Option<u64>>,
}

impl<T> Slot<T> {
    fn deliver(&self, version: u64, value: &T) {
        let mut delivered = lock(&self.delivered);
        if delivered.is_some_and(|seen| seen >= version) {
            return;
        }
        *delivered = Some(version);
        (self.callback)(value);
    }
}

struct State<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Slot<T>>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    /// Held for the whole of `update` so deliveries never interleave.
    publishing: Mutex<()>,
}

/// Owner side of a stream. Not `Clone`: there is exactly one producer.
pub struct MutableStream<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer side of a stream: read and subscribe, never update.
pub struct ReadOnlyStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReadOnlyStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MutableStream<T> {
    pub fn new(initial_value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    value: initial_value,
                    version: 0,
                    subscribers: Vec::new(),
                }),
                publishing: Mutex::new(()),
            }),
        }
    }

    /// Replaces the current value and notifies every live subscriber before
    /// returning.
    ///
    /// Callbacks run on the calling thread and must not update this stream.
    pub fn update(&self, value: T) {
        let _publishing = lock(&self.shared.publishing);
        let (slots, version) = {
            let mut state = lock(&self.shared.state);
            state.value = value.clone();
            state.version += 1;
            state.subscribers.retain(|slot| slot.strong_count() > 0);
            let slots: Vec<Arc<Slot<T>>> =
                state.subscribers.iter().filter_map(Weak::upgrade).collect();
            (slots, state.version)
        };
        trace!(version, subscribers = slots.len(), "Publishing stream value.");
        for slot in slots {
            slot.deliver(version, &value);
        }
    }

    pub fn read_only(&self) -> ReadOnlyStream<T> {
        ReadOnlyStream {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn value(&self) -> T {
        lock(&self.shared.state).value.clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        subscribe(&self.shared, callback)
    }
}

impl<T: Clone + Send + Sync + 'static> ReadOnlyStream<T> {
    pub fn value(&self) -> T {
        lock(&self.shared.state).value.clone()
    }

    /// Registers `callback`, calls it with the current value, and keeps
    /// calling it on every update until the returned guard is dropped.
    #[must_use = "dropping the subscription immediately cancels it"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        subscribe(&self.shared, callback)
    }

    /// Async view of the stream: yields the current value, then every update.
    pub fn updates(&self) -> Updates<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = sender.send(value.clone());
        });
        Updates {
            receiver: UnboundedReceiverStream::new(receiver),
            _subscription: subscription,
        }
    }

    /// Number of subscribers that are still alive.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.state)
            .subscribers
            .iter()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}

fn subscribe<T, F>(shared: &Shared<T>, callback: F) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let slot = Arc::new(Slot {
        callback: Box::new(callback),
        delivered: Mutex::new(None),
    });
    let (value, version) = {
        let mut state = lock(&shared.state);
        state.subscribers.retain(|slot| slot.strong_count() > 0);
        state.subscribers.push(Arc::downgrade(&slot));
        (state.value.clone(), state.version)
    };
    slot.deliver(version, &value);
    Subscription { _slot: slot }
}

impl<T: fmt::Debug> fmt::Debug for MutableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("MutableStream")
            .field("value", &state.value)
            .field("version", &state.version)
            .finish()
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlyStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("ReadOnlyStream")
            .field("value", &state.value)
            .field("version", &state.version)
            .finish()
    }
}

/// Keeps a stream callback alive. Drop it to unsubscribe.
pub struct Subscription {
    _slot: Arc<dyn Any + Send + Sync>,
}

impl Subscription {
    /// Explicitly ends the subscription.
    pub fn cancel(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

/// Async stream returned by [`ReadOnlyStream::updates`].
pub struct Updates<T> {
    receiver: UnboundedReceiverStream<T>,
    _subscription: Subscription,
}

impl<T> Unpin for Updates<T> {}

impl<T> Stream for Updates<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
