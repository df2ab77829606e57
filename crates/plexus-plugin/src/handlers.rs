//! Closure adapters for quick handler creation.
//!
//! Each function wraps a closure into the matching trait object so a plugin
//! can register a handler without declaring a type for it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginResult;
use crate::events::{Event, EventHandler};
use crate::hooks::{HookAction, HookHandler, HookPayload};
use crate::middleware::{Endpoint, Middleware, MiddlewareRequest, MiddlewareResponse, Next};

struct HookFn<F>(F);

#[async_trait]
impl<F, Fut> HookHandler for HookFn<F>
where
    F: Fn(HookPayload) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<HookAction>> + Send,
{
    async fn handle(&self, payload: &HookPayload) -> PluginResult<HookAction> {
        (self.0)(payload.clone()).await
    }
}

/// Builds a hook handler from an async closure over an owned payload.
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<HookAction>> + Send + 'static,
{
    Arc::new(HookFn(f))
}

struct EventFn<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for EventFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<()>> + Send,
{
    async fn handle(&self, event: &Event) -> PluginResult<()> {
        (self.0)(event.clone()).await
    }
}

/// Builds an event handler from an async closure over an owned event.
pub fn event_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<()>> + Send + 'static,
{
    Arc::new(EventFn(f))
}

struct EndpointFn<F>(F);

#[async_trait]
impl<F, Fut> Endpoint for EndpointFn<F>
where
    F: Fn(MiddlewareRequest) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<MiddlewareResponse>> + Send,
{
    async fn call(&self, req: MiddlewareRequest) -> PluginResult<MiddlewareResponse> {
        (self.0)(req).await
    }
}

/// Builds an endpoint from an async closure.
pub fn endpoint_fn<F, Fut>(f: F) -> Arc<dyn Endpoint>
where
    F: Fn(MiddlewareRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<MiddlewareResponse>> + Send + 'static,
{
    Arc::new(EndpointFn(f))
}

struct MiddlewareFn<F>(F);

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(&mut MiddlewareRequest) -> PluginResult<Option<MiddlewareResponse>> + Send + Sync,
{
    async fn handle(&self, mut req: MiddlewareRequest, next: Next<'_>) -> PluginResult<MiddlewareResponse> {
        match (self.0)(&mut req)? {
            Some(response) => Ok(response),
            None => next.run(req).await,
        }
    }
}

/// Builds a request-side middleware from a synchronous closure.
///
/// The closure may edit the request. Returning `Some(response)`
/// short-circuits the chain; `None` passes the request on.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut MiddlewareRequest) -> PluginResult<Option<MiddlewareResponse>> + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookType;
    use crate::middleware::{MiddlewareRegistration, MiddlewareRegistry, RouteScope};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_hook_fn_sees_payload() {
        let handler = hook_fn(|payload: HookPayload| async move {
            match payload.get_string("user") {
                Some("mallory") => Ok(HookAction::halt("blocked user")),
                _ => Ok(HookAction::Continue),
            }
        });
        let blocked = HookPayload::new(HookType::PreRequest).with_string("user", "mallory");
        let action = handler.handle(&blocked).await.expect("handled");
        assert!(matches!(action, HookAction::Halt { .. }));
    }

    #[tokio::test]
    async fn test_middleware_fn_short_circuits() {
        let registry = MiddlewareRegistry::new(16, Duration::from_secs(1));
        let guard = middleware_fn(|req: &mut MiddlewareRequest| {
            if req.header("x-api-key").is_none() {
                return Ok(Some(MiddlewareResponse::new(401, json!({"error": "missing key"}))));
            }
            req.extensions.insert("authenticated".into(), json!(true));
            Ok(None)
        });
        registry
            .register("auth", MiddlewareRegistration::new("key-check", 10, RouteScope::Global, guard))
            .expect("registered");
        let endpoint = endpoint_fn(|req: MiddlewareRequest| async move {
            Ok(MiddlewareResponse::ok(json!({
                "authenticated": req.extensions.get("authenticated").cloned()
            })))
        });
        let cancel = CancellationToken::new();

        let denied = registry
            .execute(MiddlewareRequest::new("GET", "/files"), endpoint.as_ref(), &cancel)
            .await
            .expect("response");
        assert_eq!(denied.status, 401);

        let allowed = registry
            .execute(
                MiddlewareRequest::new("GET", "/files").with_header("X-Api-Key", "k"),
                endpoint.as_ref(),
                &cancel,
            )
            .await
            .expect("response");
        assert_eq!(allowed.body, json!({"authenticated": true}));
    }
}
