//! Plexus host: bootstraps the extension runtime and keeps it running
//! until a shutdown signal arrives.

mod host;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use plexus_core::config::{AppConfig, StorageBackendKind};
use plexus_plugin::api::HostServices;
use plexus_plugin::discovery::find_manifest;
use plexus_plugin::hooks::{HookPayload, HookType};
use plexus_plugin::storage::{FileStorageBackend, MemoryStorageBackend, StorageBackend};
use plexus_plugin::{PluginFactory, PluginManager, PluginRegistry};

use crate::host::{HostConfiguration, MemoryCacheService, SandboxedFilesystem};

/// Entries kept by the shared host cache.
const HOST_CACHE_CAPACITY: u64 = 10_000;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {e:#}");
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> anyhow::Result<AppConfig> {
    let config_path =
        std::env::var("PLEXUS_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    AppConfig::load(&config_path).with_context(|| format!("loading '{config_path}'"))
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Extensions compiled into this host.
fn builtin_plugins() -> Vec<(&'static str, PluginFactory)> {
    vec![(
        plugin_request_audit::PLUGIN_NAME,
        plugin_request_audit::plugin_factory(),
    )]
}

/// Registers every enabled built-in, preferring a manifest from the plugin directory.
async fn register_builtins(catalog: &PluginRegistry, config: &AppConfig) -> anyhow::Result<()> {
    for (name, factory) in builtin_plugins() {
        if config.plugins.disabled.iter().any(|d| d == name) {
            tracing::info!(plugin = %name, "Plugin disabled by configuration");
            continue;
        }
        match find_manifest(&config.plugins.directory, name).await? {
            Some(manifest) => {
                tracing::debug!(plugin = %name, dir = %config.plugins.directory, "Using manifest file");
                catalog.register_with_manifest(manifest, factory).await?;
            }
            None => {
                catalog.register(name, factory).await?;
            }
        }
    }
    Ok(())
}

async fn storage_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    Ok(match config.storage.backend {
        StorageBackendKind::Memory => Arc::new(MemoryStorageBackend::new()),
        StorageBackendKind::File => Arc::new(
            FileStorageBackend::new(&config.storage.directory)
                .await
                .context("opening plugin storage")?,
        ),
    })
}

async fn host_services(config: &AppConfig) -> anyhow::Result<HostServices> {
    let sandbox = SandboxedFilesystem::new(format!("{}/files", config.storage.directory)).await?;
    Ok(HostServices::new()
        .with_cache(Arc::new(MemoryCacheService::new(HOST_CACHE_CAPACITY)))
        .with_filesystem(Arc::new(sandbox))
        .with_configuration(Arc::new(HostConfiguration::new(config))))
}

/// Main host run function
async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting Plexus v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(PluginRegistry::new());
    register_builtins(&catalog, &config).await?;

    let manager = PluginManager::new(Arc::clone(&catalog), &config)?
        .with_storage_backend(storage_backend(&config).await?)
        .with_host_services(host_services(&config).await?);

    if config.plugins.auto_load {
        let loaded = manager.initialize_all().await?;
        let started = manager.start_all().await?;
        tracing::info!(
            initialized = loaded.succeeded.len(),
            started = started.succeeded.len(),
            failed = loaded.failed.len() + started.failed.len(),
            "Plugins ready"
        );
    } else {
        tracing::info!(registered = catalog.count().await, "Auto-load disabled");
    }

    let never = CancellationToken::new();
    manager
        .dispatcher()
        .dispatch(HookPayload::new(HookType::Startup), &never)
        .await;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping plugins...");

    manager
        .dispatcher()
        .dispatch(HookPayload::new(HookType::Shutdown), &never)
        .await;
    let report = manager.shutdown().await;
    if !report.is_success() {
        for (plugin, err) in &report.failed {
            tracing::warn!(plugin = %plugin, error = %err, "Plugin did not shut down cleanly");
        }
    }

    tracing::info!("Plexus shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
