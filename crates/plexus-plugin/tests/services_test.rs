//! Cross-plugin service export and import.

mod common;

use std::sync::Arc;

use common::{Journal, TestPlugin, manager_with};
use parking_lot::Mutex;
use plexus_plugin::prelude::*;

trait Greeter: Send + Sync {
    fn greet(&self, who: &str) -> String;
}

struct English;

impl Greeter for English {
    fn greet(&self, who: &str) -> String {
        format!("hello, {who}")
    }
}

fn provider(journal: &Journal) -> TestPlugin {
    TestPlugin::new("provider", journal)
        .exports("greeter")
        .on_initialize(|ctx, _| ctx.export_service::<dyn Greeter>("greeter", Arc::new(English)))
}

#[tokio::test]
async fn test_dependent_imports_exported_service() {
    let journal = Journal::new();
    let imported: Arc<Mutex<Option<Arc<dyn Greeter>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&imported);
    let consumer = TestPlugin::new("consumer", &journal)
        .depends_on("provider", "*")
        .on_initialize(move |ctx, _| {
            let greeter = ctx.import_service::<dyn Greeter>("provider", "greeter")?;
            *slot.lock() = Some(greeter);
            Ok(())
        });
    let provider = provider(&journal);
    let manager = manager_with(&[&consumer, &provider]).await;

    let report = manager.initialize_all().await.expect("initialized");
    assert!(report.is_success());

    let greeter = imported.lock().clone().expect("imported during initialize");
    assert_eq!(greeter.greet("plexus"), "hello, plexus");

    let listed = manager.services().list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].plugin, "provider");
    assert_eq!(listed[0].service, "greeter");
}

#[tokio::test]
async fn test_import_fails_after_exporter_cleanup() {
    let journal = Journal::new();
    let provider = provider(&journal);
    let manager = manager_with(&[&provider]).await;

    manager.load_plugin("provider", None).await.expect("loads");
    manager.start_plugin("provider").await.expect("starts");
    assert!(manager.services().import::<dyn Greeter>("provider", "greeter").is_ok());

    // Stopping keeps the export; cleanup withdraws it.
    manager.stop_plugin("provider").await.expect("stops");
    assert!(manager.services().contains("provider", "greeter"));
    manager.cleanup_plugin("provider").await.expect("cleans up");

    let err = manager
        .services()
        .import::<dyn Greeter>("provider", "greeter")
        .err()
        .expect("withdrawn");
    assert!(matches!(err, PluginError::ServiceNotFound { .. }));
}

#[tokio::test]
async fn test_import_with_wrong_type() {
    let journal = Journal::new();
    let provider = provider(&journal);
    let manager = manager_with(&[&provider]).await;
    manager.load_plugin("provider", None).await.expect("loads");

    let err = provider
        .context()
        .import_service::<String>("provider", "greeter")
        .err()
        .expect("wrong type");
    assert!(matches!(err, PluginError::ServiceTypeMismatch { .. }));
}

#[tokio::test]
async fn test_reload_replaces_export() {
    let journal = Journal::new();
    let provider = TestPlugin::new("provider", &journal)
        .exports("generation")
        .on_initialize(|ctx, generation| ctx.export_service("generation", Arc::new(generation)));
    let manager = manager_with(&[&provider]).await;

    manager.load_plugin("provider", None).await.expect("loads");
    manager.start_plugin("provider").await.expect("starts");
    let first = manager.services().import::<usize>("provider", "generation").expect("bound");
    assert_eq!(*first, 1);

    manager.reload_plugin("provider", None).await.expect("reloads");
    let second = manager.services().import::<usize>("provider", "generation").expect("bound");
    assert_eq!(*second, 2);
    // Handles taken earlier stay valid; they just point at the old value.
    assert_eq!(*first, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retained_context_cannot_rebind_after_cleanup() {
    let journal = Journal::new();
    let provider = provider(&journal).subscribes("audit.tick");
    let manager = manager_with(&[&provider]).await;
    manager.load_plugin("provider", None).await.expect("loads");
    manager.start_plugin("provider").await.expect("starts");
    let ctx = provider.context();

    // Keeps re-exporting until the context is closed under it.
    let rebinding = tokio::spawn({
        let ctx = ctx.clone();
        async move {
            let mut rounds = 0usize;
            while ctx
                .export_service::<dyn Greeter>("greeter", Arc::new(English))
                .is_ok()
            {
                rounds += 1;
                tokio::task::yield_now().await;
            }
            rounds
        }
    });

    manager.unload_plugin("provider").await.expect("unloads");
    rebinding.await.expect("rebinding task joins");
    assert!(!manager.services().contains("provider", "greeter"));

    let err = ctx
        .subscribe_event("audit.tick", event_fn(|_event: Event| async { Ok(()) }))
        .expect_err("closed context");
    assert!(matches!(err, PluginError::Lifecycle { .. }));
    assert_eq!(manager.events().subscriber_count("audit.tick"), 0);
}
