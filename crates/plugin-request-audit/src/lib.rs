//! Request audit extension for Plexus.
//!
//! Stamps every request with an ID header, blocks configured paths before
//! they reach the endpoint, records completed requests, and keeps running
//! totals in the extension's storage namespace. The recorder is exported as
//! the `audit-log` service for other extensions to query.

pub mod hooks;
pub mod middleware;
pub mod plugin;
pub mod recorder;

pub use plugin::{AuditSettings, RequestAuditPlugin};
pub use recorder::{AuditLog, AuditRecord, AuditRecorder, AuditTotals};

/// Name the extension registers under.
pub const PLUGIN_NAME: &str = "request-audit";

/// Service name of the exported [`AuditLog`].
pub const AUDIT_SERVICE: &str = "audit-log";

/// Topic a record is published on after each completed request.
pub const RECORDED_TOPIC: &str = "audit.request_recorded";

/// Builds the factory the host registers in its catalog.
pub fn plugin_factory() -> plexus_plugin::PluginFactory {
    plexus_plugin::factory(RequestAuditPlugin::new)
}
