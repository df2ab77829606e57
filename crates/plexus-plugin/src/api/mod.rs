//! Plugin API: the scoped context and the host services behind it.

pub mod context;
pub mod services;

pub use context::PluginContext;
pub use services::{
    CacheService, ConfigurationService, DatabaseService, FilesystemService, HostServices,
    InMemoryMetrics, MetricsService, NetworkService, PrefixedCache, ProcessOutput, ProcessService,
    RouterService,
};
