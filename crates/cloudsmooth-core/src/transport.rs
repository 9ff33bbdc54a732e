//! The boundary with the messaging runtime, and an in-process runtime.
//!
//! A stage only needs three things from its transport: a stream of
//! messages per inbound topic, a publisher per outbound topic, and the
//! number of consumers attached to each outbound topic. [LocalBus]
//! provides all three inside one process.

use eyre::{Result, bail};
use futures::stream::{BoxStream, StreamExt};
use indexmap::IndexMap;
use std::{
    any::{Any, TypeId, type_name},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, info};

/// Sends messages on one outbound topic.
pub trait Publisher<T>: Send + Sync {
    /// Hand a message to every attached consumer.
    ///
    /// The payload is shared with consumers and is never mutated again.
    fn publish(&self, message: Arc<T>) -> Result<()>;

    /// Number of consumers currently attached to this topic.
    fn subscriber_count(&self) -> usize;
}

impl<T, P> Publisher<T> for Box<P>
where
    P: Publisher<T> + ?Sized,
{
    fn publish(&self, message: Arc<T>) -> Result<()> {
        (**self).publish(message)
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}

/// A messaging runtime.
pub trait Transport {
    /// Attach a consumer to `topic`. The stream ends when the runtime
    /// shuts the topic down.
    fn subscribe<T>(&self, topic: &str) -> Result<BoxStream<'static, Arc<T>>>
    where
        T: Send + Sync + 'static;

    /// Create a publisher for `topic`.
    fn advertise<T>(&self, topic: &str) -> Result<Box<dyn Publisher<T>>>
    where
        T: Send + Sync + 'static;
}

trait Shutdown: Send + Sync {
    fn shutdown(&self);
}

struct TopicSlot {
    type_id: TypeId,
    type_name: &'static str,
    channel: Arc<dyn Any + Send + Sync>,
    closer: Arc<dyn Shutdown>,
}

/// An in-process transport with typed, named topics.
///
/// Every subscriber owns a private unbounded queue, so publishing never
/// blocks. Cloning the bus yields another handle to the same topics.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<IndexMap<String, TopicSlot>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the topic `name` carrying `T`.
    pub fn topic<T>(&self, name: &str) -> Result<Topic<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut topics = lock(&self.topics);

        if let Some(slot) = topics.get(name) {
            if slot.type_id != TypeId::of::<T>() {
                bail!(
                    "Topic '{}' carries {}, not {}",
                    name,
                    slot.type_name,
                    type_name::<T>()
                );
            }
            let Ok(shared) = Arc::clone(&slot.channel).downcast::<Shared<T>>() else {
                bail!("Topic '{}' has an inconsistent registration", name);
            };
            return Ok(Topic { shared });
        }

        let shared = Arc::new(Shared::<T>::new(name));
        topics.insert(
            name.to_string(),
            TopicSlot {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                channel: shared.clone(),
                closer: shared.clone(),
            },
        );
        debug!(topic = %name, msg_type = type_name::<T>(), "Registered topic");

        Ok(Topic { shared })
    }

    /// Attach a consumer to `topic` that can be drained synchronously.
    pub fn subscription<T>(&self, topic: &str) -> Result<Subscription<T>>
    where
        T: Send + Sync + 'static,
    {
        Ok(self.topic::<T>(topic)?.attach())
    }

    /// Names of all registered topics, in registration order.
    pub fn topic_names(&self) -> Vec<String> {
        lock(&self.topics).keys().cloned().collect()
    }

    /// Close one topic. Its subscription streams end once their queued
    /// messages are consumed, and further publishes to it fail. Returns
    /// false if no such topic exists.
    pub fn close(&self, name: &str) -> bool {
        let topics = lock(&self.topics);
        let Some(slot) = topics.get(name) else {
            return false;
        };
        slot.closer.shutdown();
        debug!(topic = %name, "Closed topic");
        true
    }

    /// Close every topic.
    pub fn shutdown(&self) {
        let topics = lock(&self.topics);
        for slot in topics.values() {
            slot.closer.shutdown();
        }
        info!(num_topics = topics.len(), "Local bus shut down");
    }
}

impl Transport for LocalBus {
    fn subscribe<T>(&self, topic: &str) -> Result<BoxStream<'static, Arc<T>>>
    where
        T: Send + Sync + 'static,
    {
        Ok(self.subscription::<T>(topic)?.into_stream())
    }

    fn advertise<T>(&self, topic: &str) -> Result<Box<dyn Publisher<T>>>
    where
        T: Send + Sync + 'static,
    {
        Ok(Box::new(self.topic::<T>(topic)?))
    }
}

struct Shared<T> {
    name: String,
    closed: AtomicBool,
    senders: Mutex<Vec<flume::Sender<Arc<T>>>>,
}

impl<T> Shared<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Shutdown for Shared<T>
where
    T: Send + Sync,
{
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.senders).clear();
    }
}

/// A handle to one topic of a [LocalBus].
pub struct Topic<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Topic<T>
where
    T: Send + Sync + 'static,
{
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Attach a new consumer. Attaching to a closed topic yields a
    /// subscription that is already finished.
    pub fn attach(&self) -> Subscription<T> {
        let (tx, rx) = flume::unbounded();

        if !self.is_closed() {
            lock(&self.shared.senders).push(tx);
        }

        Subscription { rx }
    }
}

impl<T> Publisher<T> for Topic<T>
where
    T: Send + Sync + 'static,
{
    fn publish(&self, message: Arc<T>) -> Result<()> {
        if self.is_closed() {
            bail!("Topic '{}' is shut down", self.shared.name);
        }

        let mut senders = lock(&self.shared.senders);
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        let mut senders = lock(&self.shared.senders);
        senders.retain(|tx| !tx.is_disconnected());
        senders.len()
    }
}

/// One consumer attached to a topic.
pub struct Subscription<T> {
    rx: flume::Receiver<Arc<T>>,
}

impl<T> Subscription<T>
where
    T: Send + Sync + 'static,
{
    /// Take every queued message.
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.rx.drain().collect()
    }

    pub fn into_stream(self) -> BoxStream<'static, Arc<T>> {
        self.rx.into_stream().boxed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
