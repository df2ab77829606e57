//! Bounded queues for topics delivered asynchronously.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use plexus_core::config::{AsyncTopicConfig, BackpressureMode};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Event;
use super::bus::Subscribers;
use crate::error::{PluginError, PluginResult};

/// What a publisher experiences when a topic queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait up to the duration for space, then fail with `EventQueueFull`.
    BlockWithTimeout(Duration),
    /// Accept the event and discard the oldest queued one.
    DropOldest,
}

/// Asynchronous delivery settings for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncDelivery {
    /// Queue capacity; at least 1.
    pub capacity: usize,
    /// Full-queue behaviour.
    pub policy: BackpressurePolicy,
}

impl AsyncDelivery {
    /// Block-with-timeout delivery.
    pub fn blocking(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity,
            policy: BackpressurePolicy::BlockWithTimeout(timeout),
        }
    }

    /// Drop-oldest delivery.
    pub fn drop_oldest(capacity: usize) -> Self {
        Self {
            capacity,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl From<&AsyncTopicConfig> for AsyncDelivery {
    fn from(config: &AsyncTopicConfig) -> Self {
        match config.policy {
            BackpressureMode::Block => {
                Self::blocking(config.capacity, Duration::from_millis(config.block_timeout_ms))
            }
            BackpressureMode::DropOldest => Self::drop_oldest(config.capacity),
        }
    }
}

enum Sender {
    Bounded(mpsc::Sender<Event>, Duration),
    Ring(broadcast::Sender<Event>),
}

/// Publisher side of one async topic.
pub(crate) struct TopicQueue {
    sender: Sender,
    dropped: Arc<AtomicU64>,
}

impl TopicQueue {
    /// Creates the queue and spawns its delivery worker on the current runtime.
    pub(crate) fn spawn(
        topic: &str,
        delivery: AsyncDelivery,
        subscribers: Arc<Subscribers>,
        handler_timeout: Duration,
        shutdown: CancellationToken,
        workers: &mut tokio::task::JoinSet<()>,
    ) -> Self {
        let capacity = delivery.capacity.max(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let topic = topic.to_string();

        let sender = match delivery.policy {
            BackpressurePolicy::BlockWithTimeout(wait) => {
                let (tx, mut rx) = mpsc::channel::<Event>(capacity);
                workers.spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            next = rx.recv() => match next {
                                Some(event) => {
                                    subscribers.deliver(&event, handler_timeout, &shutdown).await;
                                }
                                None => break,
                            },
                        }
                    }
                    debug!(topic = %topic, "Event worker stopped");
                });
                Sender::Bounded(tx, wait)
            }
            BackpressurePolicy::DropOldest => {
                let (tx, mut rx) = broadcast::channel::<Event>(capacity);
                let lagged = Arc::clone(&dropped);
                workers.spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            next = rx.recv() => match next {
                                Ok(event) => {
                                    subscribers.deliver(&event, handler_timeout, &shutdown).await;
                                }
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    lagged.fetch_add(skipped, Ordering::Relaxed);
                                    warn!(topic = %topic, skipped, "Slow subscribers, oldest events dropped");
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                    debug!(topic = %topic, "Event worker stopped");
                });
                Sender::Ring(tx)
            }
        };

        Self { sender, dropped }
    }

    /// Enqueues `event` according to the topic's policy.
    pub(crate) async fn enqueue(&self, event: Event) -> PluginResult<()> {
        let topic = event.topic.clone();
        match &self.sender {
            Sender::Bounded(tx, wait) => tx.send_timeout(event, *wait).await.map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => PluginError::EventQueueFull { topic },
                mpsc::error::SendTimeoutError::Closed(_) => PluginError::Cancelled {
                    operation: format!("delivery on '{topic}'"),
                },
            }),
            Sender::Ring(tx) => tx.send(event).map(|_| ()).map_err(|_| PluginError::Cancelled {
                operation: format!("delivery on '{topic}'"),
            }),
        }
    }

    /// Events discarded by drop-oldest backpressure so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
