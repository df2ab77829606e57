//! Hook registry backed by immutable, atomically swapped snapshots.
//!
//! Dispatchers clone the current [`HookTable`] pointer and iterate it without
//! holding any lock, so a registration or unregistration never blocks a
//! running dispatch and never changes what an in-flight dispatch sees.
//! Writers are serialised, build a fresh table and publish it in one swap.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use super::definitions::{HookAction, HookPayload, HookType};
use crate::error::PluginResult;

/// Trait for hook handler implementations.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handles a hook invocation.
    async fn handle(&self, payload: &HookPayload) -> PluginResult<HookAction>;
}

/// A handler waiting to be published, as staged by a plugin context.
#[derive(Clone)]
pub struct HookRegistration {
    /// Hook type.
    pub hook_type: HookType,
    /// Priority (higher runs first).
    pub priority: i32,
    /// The handler.
    pub handler: Arc<dyn HookHandler>,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("hook_type", &self.hook_type)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A published handler.
#[derive(Clone)]
pub struct HookEntry {
    /// Plugin that registered this handler.
    pub owner: String,
    /// Priority (higher runs first).
    pub priority: i32,
    /// Global registration sequence, breaks priority ties.
    pub sequence: u64,
    /// The handler.
    pub handler: Arc<dyn HookHandler>,
}

impl fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Immutable view of every registered handler.
#[derive(Debug, Default, Clone)]
pub struct HookTable {
    by_type: HashMap<HookType, Vec<HookEntry>>,
    generation: u64,
}

impl HookTable {
    /// Handlers for `hook_type` in execution order.
    pub fn handlers(&self, hook_type: HookType) -> &[HookEntry] {
        self.by_type
            .get(&hook_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of publications that produced this table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the owners with at least one handler, deduplicated.
    pub fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self
            .by_type
            .values()
            .flatten()
            .map(|e| e.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    fn insert(&mut self, entry: HookEntry, hook_type: HookType) {
        let list = self.by_type.entry(hook_type).or_default();
        list.push(entry);
        list.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
    }

    fn remove_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for list in self.by_type.values_mut() {
            let before = list.len();
            list.retain(|e| e.owner != owner);
            removed += before - list.len();
        }
        self.by_type.retain(|_, list| !list.is_empty());
        removed
    }
}

/// Registry of hook handlers organized by hook type.
pub struct HookRegistry {
    current: RwLock<Arc<HookTable>>,
    /// Serialises writers; holds the next registration sequence.
    writer: Mutex<u64>,
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(HookTable::default())),
            writer: Mutex::new(0),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<HookTable> {
        Arc::clone(&self.current.read())
    }

    /// Publishes a single handler immediately.
    pub fn register(
        &self,
        owner: &str,
        hook_type: HookType,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        self.commit(
            owner,
            vec![HookRegistration {
                hook_type,
                priority,
                handler,
            }],
        );
    }

    /// Publishes a batch of handlers for `owner` in one swap.
    ///
    /// Dispatchers observe either none or all of the batch.
    pub fn commit(&self, owner: &str, batch: Vec<HookRegistration>) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        self.mutate(|table, sequence| {
            for registration in batch {
                let entry = HookEntry {
                    owner: owner.to_string(),
                    priority: registration.priority,
                    sequence: *sequence,
                    handler: registration.handler,
                };
                *sequence += 1;
                info!(
                    hook = %registration.hook_type,
                    plugin = %owner,
                    priority = registration.priority,
                    "Hook handler registered"
                );
                table.insert(entry, registration.hook_type);
            }
        });
        info!(plugin = %owner, count, "Hook batch published");
    }

    /// Removes every handler owned by `owner` in one swap.
    pub fn unregister_plugin(&self, owner: &str) -> usize {
        let mut removed = 0;
        self.mutate(|table, _| removed = table.remove_owner(owner));
        if removed > 0 {
            info!(plugin = %owner, removed, "All hooks unregistered for plugin");
        }
        removed
    }

    /// Returns all handlers for `hook_type` in execution order.
    pub fn handlers(&self, hook_type: HookType) -> Vec<HookEntry> {
        self.snapshot().handlers(hook_type).to_vec()
    }

    /// Returns the number of handlers registered for `hook_type`.
    pub fn handler_count(&self, hook_type: HookType) -> usize {
        self.snapshot().handlers(hook_type).len()
    }

    /// Returns the generation of the current snapshot.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    fn mutate(&self, f: impl FnOnce(&mut HookTable, &mut u64)) {
        let mut sequence = self.writer.lock();
        let mut next = HookTable::clone(&self.snapshot());
        f(&mut next, &mut sequence);
        next.generation += 1;
        *self.current.write() = Arc::new(next);
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl HookHandler for Noop {
        async fn handle(&self, _payload: &HookPayload) -> PluginResult<HookAction> {
            Ok(HookAction::Continue)
        }
    }

    fn noop() -> Arc<dyn HookHandler> {
        Arc::new(Noop)
    }

    #[test]
    fn test_priority_then_sequence_order() {
        let registry = HookRegistry::new();
        registry.register("low", HookType::PreRequest, 10, noop());
        registry.register("high", HookType::PreRequest, 50, noop());
        registry.register("tie", HookType::PreRequest, 10, noop());

        let owners: Vec<_> = registry
            .handlers(HookType::PreRequest)
            .into_iter()
            .map(|e| e.owner)
            .collect();
        assert_eq!(owners, vec!["high", "low", "tie"]);
    }

    #[tokio::test]
    async fn test_handlers_run_highest_priority_first() {
        let registry = Arc::new(HookRegistry::new());
        let ran = Arc::new(Mutex::new(Vec::new()));
        for priority in [10, 50, 30] {
            let ran = Arc::clone(&ran);
            registry.register(
                &format!("p{priority}"),
                HookType::PreRequest,
                priority,
                crate::handlers::hook_fn(move |_payload: HookPayload| {
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.lock().push(priority);
                        Ok(HookAction::Continue)
                    }
                }),
            );
        }

        let dispatcher =
            crate::hooks::HookDispatcher::new(Arc::clone(&registry), std::time::Duration::from_secs(1));
        let result = dispatcher
            .dispatch(
                HookPayload::new(HookType::PreRequest),
                &tokio_util::sync::CancellationToken::new(),
            )
            .await;
        assert_eq!(result.invoked, 3);
        assert_eq!(*ran.lock(), vec![50, 30, 10]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let registry = HookRegistry::new();
        registry.register("a", HookType::Error, 1, noop());
        let before = registry.snapshot();

        registry.register("b", HookType::Error, 1, noop());
        registry.unregister_plugin("a");

        assert_eq!(before.handlers(HookType::Error).len(), 1);
        assert_eq!(before.handlers(HookType::Error)[0].owner, "a");
        let after = registry.snapshot();
        assert_eq!(after.owners(), vec!["b".to_string()]);
        assert!(after.generation() > before.generation());
    }

    #[test]
    fn test_commit_is_a_single_publication() {
        let registry = HookRegistry::new();
        let start = registry.generation();
        registry.commit(
            "batch",
            vec![
                HookRegistration {
                    hook_type: HookType::PreRequest,
                    priority: 1,
                    handler: noop(),
                },
                HookRegistration {
                    hook_type: HookType::PostRequest,
                    priority: 1,
                    handler: noop(),
                },
            ],
        );
        assert_eq!(registry.generation(), start + 1);
        assert_eq!(registry.handler_count(HookType::PreRequest), 1);
        assert_eq!(registry.handler_count(HookType::PostRequest), 1);
        assert_eq!(registry.unregister_plugin("batch"), 2);
        assert_eq!(registry.handler_count(HookType::PostRequest), 0);
    }
}
