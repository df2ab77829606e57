//! Call-boundary guards for extension code.
//!
//! Every call into an extension goes through one of these helpers so a panic,
//! a hang or a cancelled request is converted into a [`PluginError`] that
//! names the offending plugin instead of unwinding through the host.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{PluginError, PluginResult};

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs a synchronous extension call, converting a panic into a lifecycle error.
pub(crate) fn guard_sync<T>(
    plugin: &str,
    operation: &str,
    f: impl FnOnce() -> T,
) -> PluginResult<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(plugin = %plugin, operation = %operation, panic = %message, "Extension panicked");
        PluginError::lifecycle(plugin, format!("panicked during {operation}: {message}"))
    })
}

/// Runs a lifecycle callback under `timeout`, converting panics and expiry.
pub(crate) async fn guard_lifecycle<T, F>(
    plugin: &str,
    operation: &str,
    timeout: Duration,
    fut: F,
) -> PluginResult<T>
where
    F: Future<Output = PluginResult<T>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            error!(plugin = %plugin, operation = %operation, panic = %message, "Extension panicked");
            Err(PluginError::lifecycle(
                plugin,
                format!("panicked during {operation}: {message}"),
            ))
        }
        Err(_) => Err(PluginError::Timeout {
            plugin: plugin.to_string(),
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Runs a request-path handler under `timeout` and the request's cancellation token.
pub(crate) async fn guard_handler<T, F>(
    plugin: &str,
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> PluginResult<T>
where
    F: Future<Output = PluginResult<T>>,
{
    let guarded = tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind());

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PluginError::Cancelled {
            operation: format!("{operation} in '{plugin}'"),
        }),
        outcome = guarded => match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!(plugin = %plugin, operation = %operation, panic = %message, "Handler panicked");
                Err(PluginError::handler(plugin, format!("panicked during {operation}: {message}")))
            }
            Err(_) => Err(PluginError::Timeout {
                plugin: plugin.to_string(),
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
    }
}
