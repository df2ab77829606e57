//! Event bus configuration.

use serde::{Deserialize, Serialize};

/// Event bus delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Bound on a single subscriber's handling of one event.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
    /// Topics delivered asynchronously through a bounded queue.
    #[serde(default)]
    pub async_topics: Vec<AsyncTopicConfig>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_seconds: default_handler_timeout(),
            async_topics: Vec::new(),
        }
    }
}

/// Opt-in asynchronous delivery for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTopicConfig {
    /// Topic name.
    pub topic: String,
    /// Queue capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// What happens when the queue is full.
    #[serde(default)]
    pub policy: BackpressureMode,
    /// How long a publisher waits under [`BackpressureMode::Block`].
    #[serde(default = "default_block_timeout")]
    pub block_timeout_ms: u64,
}

/// Backpressure policy applied when an async topic queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// The publisher waits up to `block_timeout_ms`, then gets an error.
    #[default]
    Block,
    /// The oldest queued event is discarded.
    DropOldest,
}

fn default_handler_timeout() -> u64 {
    10
}

fn default_capacity() -> usize {
    256
}

fn default_block_timeout() -> u64 {
    500
}
