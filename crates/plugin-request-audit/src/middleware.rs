//! Request ID middleware.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use plexus_plugin::PluginResult;
use plexus_plugin::middleware::{Middleware, MiddlewareRequest, MiddlewareResponse, Next};

/// Response header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Response header carrying the time spent below this middleware.
pub const RESPONSE_TIME_HEADER: &str = "x-response-time-ms";

/// Exposes the request ID to inner links and echoes it on the response.
#[derive(Debug, Default)]
pub struct RequestIdMiddleware;

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(&self, mut req: MiddlewareRequest, next: Next<'_>) -> PluginResult<MiddlewareResponse> {
        let request_id = req.request_id.to_string();
        req.extensions
            .insert("audit.request_id".to_string(), json!(request_id));

        let started = Instant::now();
        let response = next.run(req).await?;
        let elapsed = started.elapsed().as_millis().to_string();

        Ok(response
            .with_header(REQUEST_ID_HEADER, &request_id)
            .with_header(RESPONSE_TIME_HEADER, &elapsed))
    }
}
