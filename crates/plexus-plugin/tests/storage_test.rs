//! Per-plugin storage namespaces.

mod common;

use std::sync::Arc;

use common::{Journal, TestPlugin, manager_with, test_config};
use plexus_plugin::prelude::*;
use plexus_plugin::storage::FileStorageBackend;
use plexus_plugin::{PluginManager, PluginRegistry};

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let journal = Journal::new();
    let alpha = TestPlugin::new("alpha", &journal);
    let beta = TestPlugin::new("beta", &journal);
    let manager = manager_with(&[&alpha, &beta]).await;
    manager.initialize_all().await.expect("initialized");

    let a = alpha.context().storage();
    let b = beta.context().storage();
    a.set("counter", json!(1)).await.expect("write");
    b.set("counter", json!(99)).await.expect("write");
    a.set("only-alpha", json!(true)).await.expect("write");

    assert_eq!(a.get("counter").await.expect("read"), Some(json!(1)));
    assert_eq!(b.get("counter").await.expect("read"), Some(json!(99)));
    assert_eq!(b.get("only-alpha").await.expect("read"), None);
    assert_eq!(b.list().await.expect("list"), vec!["counter".to_string()]);

    assert_eq!(a.clear().await.expect("clear"), 2);
    assert_eq!(b.get("counter").await.expect("read"), Some(json!(99)));
}

#[tokio::test]
async fn test_storage_survives_reload_but_not_old_handles() {
    let journal = Journal::new();
    let plugin = TestPlugin::new("audit", &journal);
    let manager = manager_with(&[&plugin]).await;
    manager.load_plugin("audit", None).await.expect("loads");
    manager.start_plugin("audit").await.expect("starts");

    let old = plugin.context().storage();
    old.set("last_seen", json!("2026-10-19")).await.expect("write");

    manager.reload_plugin("audit", None).await.expect("reloads");
    let fresh = plugin.context().storage();
    assert_eq!(fresh.get("last_seen").await.expect("read"), Some(json!("2026-10-19")));

    assert!(old.is_revoked());
    let err = old.get("last_seen").await.expect_err("revoked");
    assert!(matches!(err, PluginError::Lifecycle { .. }));
}

#[tokio::test]
async fn test_file_backend_persists_across_managers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = Journal::new();
    let plugin = TestPlugin::new("audit", &journal);

    for round in 0..2 {
        let catalog = Arc::new(PluginRegistry::new());
        catalog.register("audit", plugin.factory()).await.expect("registers");
        let backend = FileStorageBackend::new(dir.path()).await.expect("backend");
        let manager = PluginManager::new(catalog, &test_config())
            .expect("manager builds")
            .with_storage_backend(Arc::new(backend));
        manager.load_plugin("audit", None).await.expect("loads");

        let storage = plugin.context().storage();
        if round == 0 {
            storage.set_as("runs", &1_u32).await.expect("write");
        } else {
            assert_eq!(storage.get_as::<u32>("runs").await.expect("read"), Some(1));
        }
        manager.shutdown().await;
    }
}
