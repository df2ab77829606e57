//! The event bus.
//!
//! Delivery is synchronous by default: `publish` runs every current subscriber
//! of the topic on the caller's task, one after another, each under the
//! handler timeout. Topics enabled with [`EventBus::enable_async`] are instead
//! pushed onto a bounded queue drained by one worker task per topic.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use plexus_core::types::SubscriptionId;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{AsyncDelivery, TopicQueue};
use super::{Event, EventHandler};
use crate::error::{PluginError, PluginResult};
use crate::safety::guard_handler;

struct Subscription {
    id: SubscriptionId,
    owner: String,
    handler: Arc<dyn EventHandler>,
}

/// Topic → subscriber lists, shared with async topic workers.
#[derive(Default)]
pub(crate) struct Subscribers {
    by_topic: DashMap<String, Vec<Arc<Subscription>>>,
    topic_of: DashMap<SubscriptionId, String>,
}

impl Subscribers {
    fn snapshot(&self, topic: &str) -> Vec<Arc<Subscription>> {
        self.by_topic
            .get(topic)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// Delivers `event` to every current subscriber, isolating failures.
    pub(crate) async fn deliver(
        &self,
        event: &Event,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let subscribers = self.snapshot(&event.topic);
        let mut report = DeliveryReport::new(&event.topic, subscribers.len());
        let operation = format!("event '{}'", event.topic);

        for sub in subscribers {
            match guard_handler(&sub.owner, &operation, timeout, cancel, sub.handler.handle(event)).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(
                        topic = %event.topic,
                        plugin = %sub.owner,
                        subscription = %sub.id,
                        error = %err,
                        "Event subscriber failed"
                    );
                    report.failures.push((sub.owner.clone(), err));
                }
            }
        }
        report
    }
}

/// Outcome of one publication.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Topic published on.
    pub topic: String,
    /// Subscribers present when the publication started.
    pub subscribers: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Failed deliveries by owning plugin.
    pub failures: Vec<(String, PluginError)>,
    /// Whether the event was queued for asynchronous delivery instead.
    pub queued: bool,
}

impl DeliveryReport {
    fn new(topic: &str, subscribers: usize) -> Self {
        Self {
            topic: topic.to_string(),
            subscribers,
            delivered: 0,
            failures: Vec::new(),
            queued: false,
        }
    }
}

/// Named-topic publish/subscribe bus.
pub struct EventBus {
    subscribers: Arc<Subscribers>,
    queues: DashMap<String, Arc<TopicQueue>>,
    workers: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
    handler_timeout: Duration,
}

impl EventBus {
    /// Creates a bus where every topic is synchronous.
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            subscribers: Arc::new(Subscribers::default()),
            queues: DashMap::new(),
            workers: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
            handler_timeout,
        }
    }

    /// Switches `topic` to bounded asynchronous delivery.
    ///
    /// Must be called within a tokio runtime; spawns the topic's worker.
    pub fn enable_async(&self, topic: &str, delivery: AsyncDelivery) {
        if self.queues.contains_key(topic) {
            debug!(topic = %topic, "Topic already asynchronous");
            return;
        }
        let queue = TopicQueue::spawn(
            topic,
            delivery,
            Arc::clone(&self.subscribers),
            self.handler_timeout,
            self.shutdown.child_token(),
            &mut self.workers.lock(),
        );
        self.queues.insert(topic.to_string(), Arc::new(queue));
        info!(topic = %topic, capacity = delivery.capacity, policy = ?delivery.policy, "Asynchronous delivery enabled");
    }

    /// Returns whether `topic` is delivered asynchronously.
    pub fn is_async(&self, topic: &str) -> bool {
        self.queues.contains_key(topic)
    }

    /// Subscribes `handler` to `topic` on behalf of `owner`.
    pub fn subscribe(&self, owner: &str, topic: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        let sub = Arc::new(Subscription {
            id,
            owner: owner.to_string(),
            handler,
        });
        self.subscribers
            .by_topic
            .entry(topic.to_string())
            .or_default()
            .push(sub);
        self.subscribers.topic_of.insert(id, topic.to_string());
        debug!(plugin = %owner, topic = %topic, subscription = %id, "Subscribed");
        id
    }

    /// Removes one subscription; returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, topic)) = self.subscribers.topic_of.remove(&id) else {
            return false;
        };
        if let Some(mut list) = self.subscribers.by_topic.get_mut(&topic) {
            list.retain(|s| s.id != id);
        }
        self.subscribers.by_topic.remove_if(&topic, |_, list| list.is_empty());
        true
    }

    /// Removes `id` only if `owner` holds it.
    pub fn unsubscribe_owned(&self, owner: &str, id: SubscriptionId) -> bool {
        let Some(topic) = self.subscribers.topic_of.get(&id).map(|t| t.value().clone()) else {
            return false;
        };
        let owned = self
            .subscribers
            .by_topic
            .get(&topic)
            .is_some_and(|list| list.iter().any(|s| s.id == id && s.owner == owner));
        owned && self.unsubscribe(id)
    }

    /// Removes every subscription owned by `owner`.
    pub fn unsubscribe_plugin(&self, owner: &str) -> usize {
        let mut removed = 0;
        for mut list in self.subscribers.by_topic.iter_mut() {
            list.retain(|s| {
                if s.owner == owner {
                    self.subscribers.topic_of.remove(&s.id);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.subscribers.by_topic.retain(|_, list| !list.is_empty());
        if removed > 0 {
            info!(plugin = %owner, removed, "All subscriptions removed for plugin");
        }
        removed
    }

    /// Number of subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .by_topic
            .get(topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscribers
            .by_topic
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    /// Events discarded on `topic` by drop-oldest backpressure.
    pub fn dropped_events(&self, topic: &str) -> u64 {
        self.queues.get(topic).map(|q| q.dropped()).unwrap_or(0)
    }

    /// Publishes `data` on `topic` as `source`.
    ///
    /// Subscriber failures never fail the publication; they are reported in
    /// the returned [`DeliveryReport`]. Asynchronous topics return once the
    /// event is queued and fail only on backpressure or after shutdown.
    pub async fn publish(
        &self,
        source: &str,
        topic: &str,
        data: serde_json::Value,
    ) -> PluginResult<DeliveryReport> {
        self.publish_event(Event::new(source, topic, data)).await
    }

    /// Publishes a pre-built event.
    pub async fn publish_event(&self, event: Event) -> PluginResult<DeliveryReport> {
        if self.shutdown.is_cancelled() {
            return Err(PluginError::Cancelled {
                operation: format!("publish on '{}'", event.topic),
            });
        }
        debug!(topic = %event.topic, source = %event.source, "Publishing event");

        // Clone out of the map so no shard guard is held across the await.
        let queue = self.queues.get(&event.topic).map(|q| Arc::clone(q.value()));
        if let Some(queue) = queue {
            let topic = event.topic.clone();
            let mut report = DeliveryReport::new(&topic, self.subscriber_count(&topic));
            queue.enqueue(event).await?;
            report.queued = true;
            return Ok(report);
        }

        Ok(self
            .subscribers
            .deliver(&event, self.handler_timeout, &self.shutdown)
            .await)
    }

    /// Stops async workers; later publications fail with `Cancelled`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        let mut workers = std::mem::take(&mut *self.workers.lock());
        let joined = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            warn!("Event workers did not stop in time, aborting");
            workers.abort_all();
        }
        info!("Event bus shut down");
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics())
            .field("async_topics", &self.queues.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AsyncDelivery;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &Event) -> PluginResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, event: &Event) -> PluginResult<()> {
            Err(PluginError::handler("failing", format!("cannot handle {}", event.topic)))
        }
    }

    struct Slow(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle(&self, _event: &Event) -> PluginResult<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let bus = EventBus::new(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("failing", "file.uploaded", Arc::new(Failing));
        bus.subscribe("counter", "file.uploaded", Arc::new(Counter(hits.clone())));

        let report = bus
            .publish("uploader", "file.uploaded", json!({"id": 1}))
            .await
            .expect("published");
        assert_eq!(report.subscribers, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "failing");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_plugin_removes_all_owned() {
        let bus = EventBus::new(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", "t1", Arc::new(Counter(hits.clone())));
        bus.subscribe("a", "t2", Arc::new(Counter(hits.clone())));
        let kept = bus.subscribe("b", "t1", Arc::new(Counter(hits.clone())));

        assert_eq!(bus.unsubscribe_plugin("a"), 2);
        assert_eq!(bus.topics(), vec!["t1".to_string()]);
        assert!(bus.unsubscribe(kept));
        assert!(!bus.unsubscribe(kept));
        assert_eq!(bus.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn test_blocking_queue_reports_full() {
        let bus = EventBus::new(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("slow", "bulk", Arc::new(Slow(hits.clone())));
        bus.enable_async("bulk", AsyncDelivery::blocking(1, Duration::from_millis(10)));

        let mut full = false;
        for i in 0..5 {
            match bus.publish("src", "bulk", json!(i)).await {
                Ok(report) => assert!(report.queued),
                Err(PluginError::EventQueueFull { topic }) => {
                    assert_eq!(topic, "bulk");
                    full = true;
                }
                Err(other) => panic!("unexpected: {other:?}"),
            }
        }
        assert!(full);
        bus.shutdown(Duration::from_secs(1)).await;
        assert!(bus.publish("src", "bulk", json!(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_oldest_never_blocks_publisher() {
        let bus = EventBus::new(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("slow", "metrics", Arc::new(Slow(hits.clone())));
        bus.enable_async("metrics", AsyncDelivery::drop_oldest(2));

        for i in 0..20 {
            let report = bus.publish("src", "metrics", json!(i)).await.expect("queued");
            assert!(report.queued);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(bus.dropped_events("metrics") > 0);
        assert!(hits.load(Ordering::SeqCst) < 20);
        bus.shutdown(Duration::from_secs(1)).await;
    }
}
