//! Stream provider contract and the in-memory fabric.
//!
//! Subscriptions are owned by the fabric, not by the subscriber: they
//! outlive the activation that created them. A new activation of the same
//! subscriber finds its handles with
//! [`subscription_handles`](StreamProvider::subscription_handles) and
//! rebinds them with [`resume`](StreamProvider::resume).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::topic::{StreamEvent, Topic};

/// Callback invoked for every event published on a subscribed topic.
///
/// The publisher awaits the returned future, so callbacks should only hand
/// the event off (enqueue it) rather than do the work inline.
pub type SubscriptionCallback = Arc<dyn Fn(StreamEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Errors from the pub/sub fabric.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// The subscription does not exist (anymore).
    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// The fabric could not accept the operation.
    #[error("pub/sub unavailable: {0}")]
    Unavailable(String),
}

/// Fabric-wide unique subscription id, increasing with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Resumable handle to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: Topic,
    subscriber: String,
}

impl SubscriptionHandle {
    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Identity of the subscriber that owns the subscription.
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }
}

/// Publish/subscribe fabric used by connection actors and servers.
#[async_trait::async_trait]
pub trait StreamProvider: fmt::Debug + Send + Sync {
    /// Publish an event to every subscription of `topic` (fire-and-forget).
    async fn publish(&self, topic: &Topic, event: StreamEvent) -> Result<(), PubSubError>;

    /// Subscribe `subscriber` to `topic`.
    async fn subscribe(
        &self,
        topic: &Topic,
        subscriber: &str,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, PubSubError>;

    /// Remove a subscription. Removing an unknown subscription is a no-op.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), PubSubError>;

    /// Existing subscriptions of `subscriber` on `topic`, oldest first.
    async fn subscription_handles(
        &self,
        topic: &Topic,
        subscriber: &str,
    ) -> Result<Vec<SubscriptionHandle>, PubSubError>;

    /// Rebind an existing subscription to a new callback.
    async fn resume(
        &self,
        handle: &SubscriptionHandle,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, PubSubError>;
}

struct Subscription {
    id: SubscriptionId,
    subscriber: String,
    callback: SubscriptionCallback,
}

/// In-process fabric backed by a concurrent map of topics.
///
/// Events are delivered by awaiting each callback in subscription order on
/// the publisher's task. Publishing to a topic with no subscribers drops the
/// event.
#[derive(Default)]
pub struct InMemoryStreamProvider {
    topics: DashMap<Topic, Vec<Subscription>>,
    next_id: AtomicU64,
}

impl InMemoryStreamProvider {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscription_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }

    fn handle(&self, topic: &Topic, subscription: &Subscription) -> SubscriptionHandle {
        SubscriptionHandle {
            id: subscription.id,
            topic: topic.clone(),
            subscriber: subscription.subscriber.clone(),
        }
    }
}

impl fmt::Debug for InMemoryStreamProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStreamProvider")
            .field("topics", &self.topics.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait::async_trait]
impl StreamProvider for InMemoryStreamProvider {
    async fn publish(&self, topic: &Topic, event: StreamEvent) -> Result<(), PubSubError> {
        // Snapshot the callbacks so none of them runs under the map guard.
        let callbacks: Vec<SubscriptionCallback> = self
            .topics
            .get(topic)
            .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default();

        tracing::debug!("Publishing on {} to {} subscriber(s)", topic, callbacks.len());

        for callback in callbacks {
            callback(event.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        subscriber: &str,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, PubSubError> {
        let subscription = Subscription {
            id: SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            subscriber: subscriber.to_string(),
            callback,
        };
        let handle = self.handle(topic, &subscription);
        self.topics
            .entry(topic.clone())
            .or_default()
            .push(subscription);

        tracing::debug!("{} subscribed to {} ({})", subscriber, topic, handle.id);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), PubSubError> {
        if let Some(mut subs) = self.topics.get_mut(&handle.topic) {
            subs.retain(|s| s.id != handle.id);
        }
        self.topics.remove_if(&handle.topic, |_, subs| subs.is_empty());

        tracing::debug!(
            "{} unsubscribed from {} ({})",
            handle.subscriber,
            handle.topic,
            handle.id
        );
        Ok(())
    }

    async fn subscription_handles(
        &self,
        topic: &Topic,
        subscriber: &str,
    ) -> Result<Vec<SubscriptionHandle>, PubSubError> {
        let mut handles: Vec<SubscriptionHandle> = self
            .topics
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.subscriber == subscriber)
                    .map(|s| self.handle(topic, s))
                    .collect()
            })
            .unwrap_or_default();
        handles.sort_by_key(|h| h.id);
        Ok(handles)
    }

    async fn resume(
        &self,
        handle: &SubscriptionHandle,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, PubSubError> {
        let mut subs = self
            .topics
            .get_mut(&handle.topic)
            .ok_or(PubSubError::UnknownSubscription(handle.id))?;
        let subscription = subs
            .iter_mut()
            .find(|s| s.id == handle.id)
            .ok_or(PubSubError::UnknownSubscription(handle.id))?;
        subscription.callback = callback;

        tracing::debug!(
            "{} resumed {} on {}",
            handle.subscriber,
            handle.id,
            handle.topic
        );
        Ok(handle.clone())
    }
}
