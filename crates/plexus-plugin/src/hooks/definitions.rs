//! Hook type definitions with typed payloads.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use plexus_core::types::RequestId;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// The closed set of pipeline events hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookType {
    /// Fired once after all plugins have started.
    Startup,
    /// Fired once before plugins are stopped.
    Shutdown,
    /// Fired before the request is routed. Can modify or halt.
    PreRequest,
    /// Fired after the request was handled.
    PostRequest,
    /// Fired before the response is written. Can modify or halt.
    PreResponse,
    /// Fired after the response was written.
    PostResponse,
    /// Fired when request handling failed.
    Error,
}

impl HookType {
    /// Every hook type.
    pub const ALL: [HookType; 7] = [
        Self::Startup,
        Self::Shutdown,
        Self::PreRequest,
        Self::PostRequest,
        Self::PreResponse,
        Self::PostResponse,
        Self::Error,
    ];

    /// Returns the string name of this hook type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::PreRequest => "pre-request",
            Self::PostRequest => "post-request",
            Self::PreResponse => "pre-response",
            Self::PostResponse => "post-response",
            Self::Error => "error",
        }
    }

    /// Returns whether handlers of this type shape the request.
    ///
    /// The first failing or halting handler of a request-shaping hook aborts
    /// the remaining handlers and becomes the request outcome. Every other
    /// hook type is observational: all handlers run and failures are only
    /// collected.
    pub fn is_request_shaping(&self) -> bool {
        matches!(self, Self::PreRequest | Self::PreResponse)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HookType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| PluginError::InvalidHookType {
                name: s.to_string(),
            })
    }
}

/// Payload passed to hook handlers: a flexible key-value map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    /// The hook being fired.
    pub hook: HookType,
    /// The request this invocation belongs to.
    pub request_id: RequestId,
    /// Arbitrary data keyed by string.
    pub data: HashMap<String, serde_json::Value>,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Request deadline; handlers never run past it.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl HookPayload {
    /// Creates a new hook payload.
    pub fn new(hook: HookType) -> Self {
        Self {
            hook,
            request_id: RequestId::new(),
            data: HashMap::new(),
            timestamp: Utc::now(),
            deadline: None,
        }
    }

    /// Sets the request ID.
    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Sets the deadline to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Inserts a data value.
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Inserts a string value.
    pub fn with_string(self, key: &str, value: &str) -> Self {
        self.with_data(key, serde_json::json!(value))
    }

    /// Inserts an integer value.
    pub fn with_int(self, key: &str, value: i64) -> Self {
        self.with_data(key, serde_json::json!(value))
    }

    /// Gets a data value by key.
    pub fn get_data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Gets a string data value.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Gets an i64 data value.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_i64())
    }

    /// Returns the time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// What a handler tells the dispatcher to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HookAction {
    /// Continue to the next handler.
    Continue,
    /// Continue with these entries merged into the payload data.
    ContinueWith(HashMap<String, serde_json::Value>),
    /// Abort a request-shaping hook; ignored for observational hooks.
    Halt {
        /// Reason for halting.
        reason: String,
    },
}

impl HookAction {
    /// Creates a halt action.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self::Halt {
            reason: reason.into(),
        }
    }
}
