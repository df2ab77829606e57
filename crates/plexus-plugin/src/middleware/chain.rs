//! Request/response types and chain execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use plexus_core::types::RequestId;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::registry::MiddlewareEntry;
use crate::error::{PluginError, PluginResult};
use crate::safety::guard_handler;

/// Transport-neutral request passed through the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareRequest {
    /// Request identifier.
    pub request_id: RequestId,
    /// Method, e.g. `GET`.
    pub method: String,
    /// Route path.
    pub path: String,
    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Values attached by earlier middleware.
    #[serde(default)]
    pub extensions: HashMap<String, serde_json::Value>,
    /// Request deadline.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl MiddlewareRequest {
    /// Creates a request for `method` and `path`.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            request_id: RequestId::new(),
            method: method.to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: serde_json::Value::Null,
            extensions: HashMap::new(),
            deadline: None,
        }
    }

    /// Sets a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Sets the deadline to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Gets a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Response produced by the endpoint and shaped by middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl MiddlewareResponse {
    /// Creates a response with `status` and `body`.
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// A `200` response.
    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200, body)
    }

    /// Sets a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

/// A chain link contributed by a plugin.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles the request; call `next.run(req)` to continue the chain.
    async fn handle(
        &self,
        req: MiddlewareRequest,
        next: Next<'_>,
    ) -> PluginResult<MiddlewareResponse>;
}

/// The terminal handler at the innermost end of a chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Produces the response.
    async fn call(&self, req: MiddlewareRequest) -> PluginResult<MiddlewareResponse>;
}

/// The remainder of a chain.
pub struct Next<'a> {
    chain: &'a [Arc<MiddlewareEntry>],
    endpoint: &'a dyn Endpoint,
    cancel: &'a CancellationToken,
    timeout: Duration,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<MiddlewareEntry>],
        endpoint: &'a dyn Endpoint,
        cancel: &'a CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            chain,
            endpoint,
            cancel,
            timeout,
        }
    }

    /// Number of middleware left before the endpoint.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Runs the next middleware, or the endpoint when the chain is exhausted.
    pub async fn run(self, req: MiddlewareRequest) -> PluginResult<MiddlewareResponse> {
        if self.cancel.is_cancelled() {
            return Err(PluginError::Cancelled {
                operation: format!("request {}", req.path),
            });
        }
        let timeout = req
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()).min(self.timeout))
            .unwrap_or(self.timeout);

        match self.chain.split_first() {
            Some((entry, rest)) => {
                let next = Next::new(rest, self.endpoint, self.cancel, self.timeout);
                let operation = format!("middleware '{}'", entry.name);
                guard_handler(
                    &entry.owner,
                    &operation,
                    timeout,
                    self.cancel,
                    entry.middleware.handle(req, next),
                )
                .await
            }
            None => {
                guard_handler(
                    "host",
                    "endpoint",
                    timeout,
                    self.cancel,
                    self.endpoint.call(req),
                )
                .await
            }
        }
    }
}
