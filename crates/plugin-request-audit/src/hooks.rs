//! Hook handlers for the request audit extension.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use plexus_plugin::hooks::{HookAction, HookHandler, HookPayload};
use plexus_plugin::middleware::RoutePattern;
use plexus_plugin::{PluginContext, PluginResult};

use crate::RECORDED_TOPIC;
use crate::recorder::{AuditRecord, AuditRecorder};

/// Compiled block list, swapped whole on configuration change.
pub type BlockList = Arc<RwLock<Vec<RoutePattern>>>;

/// `pre-request`: halts requests whose path matches the block list.
pub struct BlockListHook {
    blocked: BlockList,
    recorder: Arc<AuditRecorder>,
}

impl BlockListHook {
    /// Create a new pre-request handler
    pub fn new(blocked: BlockList, recorder: Arc<AuditRecorder>) -> Self {
        Self { blocked, recorder }
    }
}

#[async_trait]
impl HookHandler for BlockListHook {
    async fn handle(&self, payload: &HookPayload) -> PluginResult<HookAction> {
        let Some(path) = payload.get_string("path") else {
            return Ok(HookAction::Continue);
        };

        let hit = self
            .blocked
            .read()
            .iter()
            .find(|p| p.matches(path))
            .map(|p| p.as_str().to_string());

        if let Some(pattern) = hit {
            self.recorder.record_blocked();
            info!(request_id = %payload.request_id, path = %path, pattern = %pattern, "Request blocked");
            return Ok(HookAction::halt(format!("path '{path}' is blocked")));
        }

        let mut stamp = HashMap::new();
        stamp.insert("audit.received_at".to_string(), json!(Utc::now().to_rfc3339()));
        Ok(HookAction::ContinueWith(stamp))
    }
}

/// `post-response`: records the completed request and announces it.
pub struct CompletionHook {
    recorder: Arc<AuditRecorder>,
    ctx: PluginContext,
}

impl CompletionHook {
    /// Create a new post-response handler
    pub fn new(recorder: Arc<AuditRecorder>, ctx: PluginContext) -> Self {
        Self { recorder, ctx }
    }
}

#[async_trait]
impl HookHandler for CompletionHook {
    async fn handle(&self, payload: &HookPayload) -> PluginResult<HookAction> {
        let status = payload
            .get_i64("status")
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        let record = AuditRecord {
            request_id: payload.request_id,
            method: payload.get_string("method").unwrap_or("-").to_string(),
            path: payload.get_string("path").unwrap_or("-").to_string(),
            status,
            duration_ms: payload
                .get_i64("duration_ms")
                .and_then(|d| u64::try_from(d).ok())
                .unwrap_or(0),
            recorded_at: Utc::now(),
        };
        debug!(request_id = %record.request_id, status, path = %record.path, "Request recorded");

        let data = json!(record);
        self.recorder.record(record);
        if let Err(e) = self.ctx.publish_event(RECORDED_TOPIC, data).await {
            warn!(error = %e, "Failed to publish audit record");
        }
        Ok(HookAction::Continue)
    }
}
