//! Request audit plugin implementation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use plexus_plugin::events::lifecycle_topic;
use plexus_plugin::middleware::RoutePattern;
use plexus_plugin::prelude::*;

use crate::hooks::{BlockList, BlockListHook, CompletionHook};
use crate::middleware::RequestIdMiddleware;
use crate::recorder::{AuditLog, AuditRecorder, AuditTotals};
use crate::{AUDIT_SERVICE, PLUGIN_NAME, RECORDED_TOPIC};

/// Storage key of the persisted [`AuditTotals`].
pub const TOTALS_KEY: &str = "totals";

/// Validated extension configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Route patterns refused at `pre-request`.
    pub blocked_paths: Vec<String>,
    /// How often totals are written to storage.
    pub flush_interval_seconds: u64,
    /// Records kept in memory.
    pub max_records: usize,
}

impl AuditSettings {
    fn compile(&self) -> PluginResult<Vec<RoutePattern>> {
        self.blocked_paths
            .iter()
            .map(|p| {
                RoutePattern::parse(p).map_err(|e| PluginError::InvalidConfig {
                    plugin: PLUGIN_NAME.to_string(),
                    message: format!("blocked path '{p}': {e}"),
                })
            })
            .collect()
    }
}

/// Request audit extension.
#[derive(Default)]
pub struct RequestAuditPlugin {
    ctx: Option<PluginContext>,
    recorder: Option<Arc<AuditRecorder>>,
    blocked: BlockList,
    flush_interval: Duration,
}

impl RequestAuditPlugin {
    /// Create a new request audit plugin
    pub fn new() -> Self {
        Self::default()
    }
}

async fn flush(storage: &PluginStorage, recorder: &AuditRecorder) -> PluginResult<()> {
    if let Some(totals) = recorder.take_dirty_totals() {
        storage.set_as(TOTALS_KEY, &totals).await?;
        debug!(requests = totals.requests, blocked = totals.blocked, "Audit totals flushed");
    }
    Ok(())
}

#[async_trait]
impl Plugin for RequestAuditPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Stamps, blocks and records requests"
    }

    fn author(&self) -> &str {
        "Plexus Team"
    }

    fn framework_version_constraint(&self) -> Option<&str> {
        Some("^0.1")
    }

    fn permissions(&self) -> PermissionSet {
        PermissionSet::from_capabilities(&[Capability::Router])
    }

    fn hooks(&self) -> Vec<HookDeclaration> {
        vec![
            HookDeclaration::new(HookType::PreRequest, 200),
            HookDeclaration::new(HookType::PostResponse, 100),
        ]
    }

    fn events(&self) -> EventDeclarations {
        EventDeclarations {
            publishes: vec![RECORDED_TOPIC.to_string()],
            subscribes: vec![lifecycle_topic("failed")],
        }
    }

    fn exports(&self) -> Vec<String> {
        vec![AUDIT_SERVICE.to_string()]
    }

    fn config_schema(&self) -> ConfigSchema {
        config_schema! {
            "blocked_paths" => array, default: json!([]);
            "flush_interval_seconds" => integer, default: json!(30);
            "max_records" => integer, default: json!(1000);
        }
    }

    async fn initialize(&mut self, ctx: PluginContext) -> PluginResult<()> {
        let settings: AuditSettings = ctx.config_as()?;
        *self.blocked.write() = settings.compile()?;
        self.flush_interval = Duration::from_secs(settings.flush_interval_seconds.max(1));

        let totals = ctx
            .storage()
            .get_as::<AuditTotals>(TOTALS_KEY)
            .await?
            .unwrap_or_default();
        let recorder = Arc::new(AuditRecorder::with_totals(settings.max_records, totals));

        ctx.register_hook(
            HookType::PreRequest,
            Arc::new(BlockListHook::new(Arc::clone(&self.blocked), Arc::clone(&recorder))),
        )?;
        ctx.register_hook(
            HookType::PostResponse,
            Arc::new(CompletionHook::new(Arc::clone(&recorder), ctx.clone())),
        )?;
        ctx.register_middleware("request-id", 1000, RouteScope::Global, Arc::new(RequestIdMiddleware))?;
        ctx.export_service::<dyn AuditLog>(AUDIT_SERVICE, recorder.clone())?;

        let failures = Arc::clone(&recorder);
        ctx.subscribe_event(
            &lifecycle_topic("failed"),
            event_fn(move |event: Event| {
                let failures = Arc::clone(&failures);
                async move {
                    if event.data["plugin"] != json!(PLUGIN_NAME) {
                        failures.record_plugin_failure();
                    }
                    Ok(())
                }
            }),
        )?;

        info!(
            blocked = settings.blocked_paths.len(),
            requests_so_far = totals.requests,
            "Request audit initialized"
        );
        self.recorder = Some(recorder);
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        let (Some(ctx), Some(recorder)) = (&self.ctx, &self.recorder) else {
            return Err(PluginError::lifecycle(PLUGIN_NAME, "started before initialize"));
        };
        let storage = ctx.storage();
        let recorder = Arc::clone(recorder);
        let period = self.flush_interval;

        ctx.spawn_task("flush-totals", move |cancel| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = flush(&storage, &recorder).await {
                            warn!(error = %e, "Periodic audit flush failed");
                        }
                    }
                }
            }
            flush(&storage, &recorder).await
        })
    }

    async fn stop(&mut self) -> PluginResult<()> {
        if let Some(recorder) = &self.recorder {
            let totals = recorder.totals();
            info!(requests = totals.requests, blocked = totals.blocked, "Request audit stopped");
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> PluginResult<()> {
        self.recorder = None;
        self.ctx = None;
        Ok(())
    }

    async fn on_config_change(&mut self, config: &Value) -> PluginResult<()> {
        let settings: AuditSettings =
            serde_json::from_value(config.clone()).map_err(|e| PluginError::InvalidConfig {
                plugin: PLUGIN_NAME.to_string(),
                message: e.to_string(),
            })?;
        let compiled = settings.compile()?;
        *self.blocked.write() = compiled;
        info!(blocked = settings.blocked_paths.len(), "Block list updated");
        Ok(())
    }
}
