//! Delivering published lines to every connected subscriber.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task;

use futures_util::stream::Stream as FuturesStream;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::message::Message;

/// Something a [`Message`] can be pushed into, typically the outbound half
/// of a network connection.
///
/// A failed send is final: the registry drops the channel and never retries
/// it. Implementations must not block.
pub trait Channel: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), Error>;
}

impl Channel for mpsc::UnboundedSender<Message> {
    fn send(&self, message: &Message) -> Result<(), Error> {
        mpsc::UnboundedSender::send(self, message.clone()).map_err(|_e| Error::Delivery)
    }
}

/// A full channel counts as a failed send.
impl Channel for mpsc::Sender<Message> {
    fn send(&self, message: &Message) -> Result<(), Error> {
        self.try_send(message.clone()).map_err(|_e| Error::Delivery)
    }
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A channel paired with the id that identifies it in a [`FanoutRegistry`].
///
/// Clones share the id, so subscribing a clone of an already subscribed
/// handle is a no-op.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    channel: Arc<dyn Channel>,
}

impl Subscriber {
    pub fn new(channel: impl Channel + 'static) -> Self {
        Subscriber {
            id: SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed)),
            channel: Arc::new(channel),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn send(&self, message: &Message) -> Result<(), Error> {
        self.channel.send(message)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Creates a [`Subscriber`] backed by an unbounded channel, and the
/// [`Subscription`] that receives what is sent to it.
pub fn channel() -> (Subscriber, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Subscriber::new(tx), Subscription { rx })
}

/// Receiving end of [`channel`]. Dropping it makes the next send to the
/// paired subscriber fail.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl FuturesStream for Subscription {
    type Item = Message;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

type Snapshot = Arc<BTreeMap<SubscriberId, Subscriber>>;

/// The set of live subscribers, shared by watchers (which publish) and the
/// transport (which subscribes and unsubscribes).
///
/// Membership is copy-on-write: `publish` sends to a snapshot taken when it
/// starts, so concurrent subscribe/unsubscribe calls can never skip or
/// double-visit a channel. A subscriber added mid-publish sees the next
/// message, not the current one.
#[derive(Clone, Default)]
pub struct FanoutRegistry {
    subscribers: Arc<Mutex<Snapshot>>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.lock())
    }

    /// Adds `subscriber`. Returns `false` if it was already present.
    pub fn subscribe(&self, subscriber: &Subscriber) -> bool {
        let mut guard = self.lock();
        if guard.contains_key(&subscriber.id) {
            return false;
        }
        Arc::make_mut(&mut *guard).insert(subscriber.id, subscriber.clone());
        tracing::debug!(subscriber = %subscriber.id, "Subscriber added");
        true
    }

    /// Removes the subscriber with `id`. Returns `false` if it was absent.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.lock();
        if !guard.contains_key(&id) {
            return false;
        }
        Arc::make_mut(&mut *guard).remove(&id);
        tracing::debug!(subscriber = %id, "Subscriber removed");
        true
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every subscriber, closing channels no one else holds.
    pub fn clear(&self) {
        *self.lock() = Snapshot::default();
    }

    /// Sends a realtime line to every subscriber and returns how many sends
    /// succeeded. Subscribers whose send fails are removed.
    pub fn publish(&self, log_id: &str, text: &str) -> usize {
        self.broadcast(&Message::realtime(log_id, text))
    }

    /// Sends `message` to every subscriber and returns how many sends
    /// succeeded. Subscribers whose send fails are removed.
    pub fn broadcast(&self, message: &Message) -> usize {
        let snapshot = self.snapshot();
        let mut delivered = 0;

        for (id, subscriber) in snapshot.iter() {
            match subscriber.send(message) {
                Ok(()) => delivered += 1,
                Err(_e) => {
                    // Someone else may have removed it already.
                    if self.unsubscribe(*id) {
                        tracing::debug!(subscriber = %id, "Dropped subscriber after failed send");
                    }
                }
            }
        }

        delivered
    }

    /// Sends `message` to a single subscriber, removing it from the registry
    /// if the send fails.
    pub fn send_to(&self, subscriber: &Subscriber, message: &Message) -> Result<(), Error> {
        subscriber.send(message).map_err(|e| {
            self.unsubscribe(subscriber.id);
            e
        })
    }
}

impl fmt::Debug for FanoutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FanoutRegistry")
            .field("subscribers", &self.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
