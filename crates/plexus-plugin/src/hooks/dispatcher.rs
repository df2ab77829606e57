//! Hook dispatcher: runs handlers from one snapshot and aggregates results.
//!
//! For request-shaping hooks (`pre-request`, `pre-response`):
//! - Handlers are called in priority order.
//! - The first error or `Halt` stops execution and becomes the outcome.
//!
//! For observational hooks:
//! - All handlers are called regardless of individual results.
//! - Failures are collected and logged, never propagated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::definitions::{HookAction, HookPayload};
use super::registry::HookRegistry;
use crate::error::{PluginError, PluginResult};
use crate::safety::guard_handler;

/// Aggregated result of dispatching a hook to all handlers.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Payload after every `ContinueWith` merge.
    pub payload: HookPayload,
    /// Number of handlers that ran.
    pub invoked: usize,
    /// Error or halt that aborted a request-shaping hook.
    pub aborted: Option<PluginError>,
    /// Isolated failures of observational handlers.
    pub failures: Vec<PluginError>,
    /// Merged modifications from `ContinueWith` results.
    pub modifications: HashMap<String, serde_json::Value>,
}

impl DispatchResult {
    fn empty(payload: HookPayload) -> Self {
        Self {
            payload,
            invoked: 0,
            aborted: None,
            failures: Vec::new(),
            modifications: HashMap::new(),
        }
    }

    /// Returns whether a request-shaping handler stopped the request.
    pub fn halted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Dispatches hooks to all registered handlers.
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
    hook_timeout: Duration,
}

impl HookDispatcher {
    /// Creates a dispatcher with a per-handler timeout.
    pub fn new(registry: Arc<HookRegistry>, hook_timeout: Duration) -> Self {
        Self {
            registry,
            hook_timeout,
        }
    }

    /// Returns the registry this dispatcher reads from.
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Dispatches `payload` to every handler of its hook type.
    ///
    /// The handler list is captured once; registrations made while the
    /// dispatch runs are not observed by it.
    pub async fn dispatch(
        &self,
        payload: HookPayload,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let snapshot = self.registry.snapshot();
        let hook = payload.hook;
        let handlers = snapshot.handlers(hook);

        if handlers.is_empty() {
            return DispatchResult::empty(payload);
        }

        debug!(hook = %hook, handler_count = handlers.len(), "Dispatching hook");

        let shaping = hook.is_request_shaping();
        let mut result = DispatchResult::empty(payload);

        for entry in handlers {
            if cancel.is_cancelled() {
                result.aborted = Some(PluginError::Cancelled {
                    operation: format!("{hook} dispatch"),
                });
                break;
            }

            let timeout = match result.payload.remaining() {
                Some(left) => left.min(self.hook_timeout),
                None => self.hook_timeout,
            };
            let operation = format!("{hook} hook");
            let outcome = guard_handler(
                &entry.owner,
                &operation,
                timeout,
                cancel,
                entry.handler.handle(&result.payload),
            )
            .await;
            result.invoked += 1;

            match outcome {
                Ok(HookAction::Continue) => {}
                Ok(HookAction::ContinueWith(mods)) => {
                    debug!(
                        hook = %hook,
                        plugin = %entry.owner,
                        modifications = mods.len(),
                        "Handler returned ContinueWith"
                    );
                    result.payload.data.extend(mods.clone());
                    result.modifications.extend(mods);
                }
                Ok(HookAction::Halt { reason }) if shaping => {
                    info!(hook = %hook, plugin = %entry.owner, reason = %reason, "Handler halted execution");
                    result.aborted = Some(PluginError::Halted {
                        plugin: entry.owner.clone(),
                        reason,
                    });
                    break;
                }
                Ok(HookAction::Halt { .. }) => {
                    warn!(
                        hook = %hook,
                        plugin = %entry.owner,
                        "Handler returned Halt for observational hook, ignoring"
                    );
                }
                Err(err) if shaping || matches!(err, PluginError::Cancelled { .. }) => {
                    warn!(hook = %hook, plugin = %entry.owner, error = %err, "Hook handler aborted dispatch");
                    result.aborted = Some(err);
                    break;
                }
                Err(err) => {
                    warn!(hook = %hook, plugin = %entry.owner, error = %err, "Hook handler failed");
                    result.failures.push(err);
                }
            }
        }

        result
    }

    /// Fires a hook and returns the aborting error, if any.
    ///
    /// Convenience method for request-shaping hooks.
    pub async fn fire_or_halt(
        &self,
        payload: HookPayload,
        cancel: &CancellationToken,
    ) -> PluginResult<DispatchResult> {
        let mut result = self.dispatch(payload, cancel).await;
        match result.aborted.take() {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Fires a hook without a cancellation source, ignoring aborts.
    pub async fn fire_and_forget(&self, payload: HookPayload) -> DispatchResult {
        let hook = payload.hook;
        let result = self.dispatch(payload, &CancellationToken::new()).await;
        if !result.failures.is_empty() {
            debug!(hook = %hook, failures = result.failures.len(), "Hook fired with failures");
        }
        result
    }
}
