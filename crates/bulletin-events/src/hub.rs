//! Event hub
//!
//! TigerStyle: Bounded per-subscriber queues, producer never blocks.
//!
//! Each subscriber owns a bounded channel. [`Hub::emit`] uses `try_send`, so a
//! subscriber that is full or gone is disconnected instead of slowing the
//! producer or the other subscribers.

use bulletin_core::constants::EVENT_SUBSCRIBERS_COUNT_MAX;
use bulletin_core::{Error, EventStream, LrpMetrics, Result};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type CountCallback = Arc<dyn Fn(usize) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    sender: mpsc::Sender<E>,
    predicate: Option<Predicate<E>>,
}

struct HubState<E> {
    subscribers: Vec<Subscriber<E>>,
    callbacks: Vec<CountCallback>,
    next_subscriber_id: u64,
    closed: bool,
}

impl<E> HubState<E> {
    fn count_changed(&self) -> Option<(usize, Vec<CountCallback>)> {
        if self.callbacks.is_empty() {
            return None;
        }
        Some((self.subscribers.len(), self.callbacks.clone()))
    }
}

fn lock<E>(state: &Mutex<HubState<E>>) -> MutexGuard<'_, HubState<E>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn notify(pending: Option<(usize, Vec<CountCallback>)>) {
    if let Some((count, callbacks)) = pending {
        for callback in callbacks {
            callback(count);
        }
    }
}

/// Broadcaster for one event stream
pub struct Hub<E> {
    state: Arc<Mutex<HubState<E>>>,
    buffer_size: usize,
    stream: EventStream,
    metrics: Arc<LrpMetrics>,
}

impl<E> Clone for Hub<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            buffer_size: self.buffer_size,
            stream: self.stream,
            metrics: self.metrics.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Hub<E> {
    pub fn new(stream: EventStream, buffer_size: usize, metrics: Arc<LrpMetrics>) -> Self {
        assert!(buffer_size > 0, "buffer_size must be positive");

        Self {
            state: Arc::new(Mutex::new(HubState {
                subscribers: Vec::new(),
                callbacks: Vec::new(),
                next_subscriber_id: 0,
                closed: false,
            })),
            buffer_size,
            stream,
            metrics,
        }
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> Result<EventSource<E>> {
        self.add_subscriber(None)
    }

    /// Subscribe to events matching `predicate`
    pub fn subscribe_filtered<P>(&self, predicate: P) -> Result<EventSource<E>>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.add_subscriber(Some(Arc::new(predicate)))
    }

    fn add_subscriber(&self, predicate: Option<Predicate<E>>) -> Result<EventSource<E>> {
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        let (id, pending) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(Error::HubClosed);
            }
            if state.subscribers.len() >= EVENT_SUBSCRIBERS_COUNT_MAX {
                return Err(Error::ResourceConflict {
                    resource: format!("{} event hub", self.stream.as_str()),
                    reason: format!("subscriber limit {} reached", EVENT_SUBSCRIBERS_COUNT_MAX),
                });
            }

            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.subscribers.push(Subscriber {
                id,
                sender,
                predicate,
            });
            (id, state.count_changed())
        };
        notify(pending);

        debug!(stream = self.stream.as_str(), subscriber_id = id, "subscriber added");

        Ok(EventSource {
            id,
            receiver,
            hub: Arc::downgrade(&self.state),
        })
    }

    /// Deliver `event` to every matching subscriber without waiting
    pub fn emit(&self, event: E) -> Result<()> {
        let mut dropped = 0u64;

        let pending = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(Error::HubClosed);
            }

            let before = state.subscribers.len();
            state.subscribers.retain(|subscriber| {
                if let Some(predicate) = &subscriber.predicate {
                    if !predicate(&event) {
                        return !subscriber.sender.is_closed();
                    }
                }
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });

            (state.subscribers.len() != before)
                .then(|| state.count_changed())
                .flatten()
        };

        if dropped > 0 {
            warn!(
                stream = self.stream.as_str(),
                dropped = dropped,
                "disconnected subscribers that fell behind"
            );
            for _ in 0..dropped {
                self.metrics.record_subscriber_dropped();
            }
        }
        self.metrics.record_events_emitted(self.stream, 1);
        notify(pending);

        Ok(())
    }

    /// Disconnect every subscriber and refuse new ones
    pub fn close(&self) -> Result<()> {
        let pending = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(Error::HubClosed);
            }
            state.closed = true;
            state.subscribers.clear();
            state.count_changed()
        };
        notify(pending);

        debug!(stream = self.stream.as_str(), "hub closed");
        Ok(())
    }

    /// Call `callback` with the subscriber count now and after every change
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let callback: CountCallback = Arc::new(callback);
        let count = {
            let mut state = lock(&self.state);
            state.callbacks.push(callback.clone());
            state.subscribers.len()
        };
        callback(count);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

/// Receiving end of one subscription
///
/// Dropping the source unsubscribes it.
pub struct EventSource<E> {
    id: u64,
    receiver: mpsc::Receiver<E>,
    hub: Weak<Mutex<HubState<E>>>,
}

impl<E> EventSource<E> {
    /// Next event, or `SourceClosed` once the hub dropped this subscriber
    pub async fn next(&mut self) -> Result<E> {
        self.receiver.recv().await.ok_or(Error::SourceClosed)
    }

    /// Next event if one is already buffered
    pub fn try_next(&mut self) -> Result<Option<E>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::SourceClosed),
        }
    }

    /// Unsubscribe
    pub fn close(self) {}
}

impl<E> Drop for EventSource<E> {
    fn drop(&mut self) {
        self.receiver.close();

        let Some(state) = self.hub.upgrade() else {
            return;
        };
        let pending = {
            let mut state = lock(&state);
            let before = state.subscribers.len();
            state.subscribers.retain(|s| s.id != self.id);
            (state.subscribers.len() != before)
                .then(|| state.count_changed())
                .flatten()
        };
        notify(pending);
    }
}
