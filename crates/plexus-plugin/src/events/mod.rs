//! Named-topic publish/subscribe between plugins.

pub mod bus;
pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plexus_core::types::EventId;
use serde::{Deserialize, Serialize};

use crate::error::PluginResult;

pub use bus::{DeliveryReport, EventBus};
pub use queue::{AsyncDelivery, BackpressurePolicy};

/// Source name used for events the runtime itself publishes.
pub const RUNTIME_SOURCE: &str = "plexus";

/// Topic prefix for lifecycle notifications.
pub const LIFECYCLE_TOPIC_PREFIX: &str = "plexus.plugin.";

/// A published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Topic the event was published on.
    pub topic: String,
    /// Publishing plugin, or [`RUNTIME_SOURCE`].
    pub source: String,
    /// Payload.
    pub data: serde_json::Value,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event.
    pub fn new(source: &str, topic: &str, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.to_string(),
            source: source.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Trait for event subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &Event) -> PluginResult<()>;
}

/// Returns the lifecycle topic for `transition`, e.g. `plexus.plugin.started`.
pub fn lifecycle_topic(transition: &str) -> String {
    format!("{LIFECYCLE_TOPIC_PREFIX}{transition}")
}
