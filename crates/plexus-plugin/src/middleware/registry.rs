//! Middleware registry backed by immutable, atomically swapped snapshots.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::chain::{Endpoint, Middleware, MiddlewareRequest, MiddlewareResponse, Next};
use super::pattern::RouteScope;
use crate::error::{PluginError, PluginResult};

/// Middleware waiting to be published, as staged by a plugin context.
#[derive(Clone)]
pub struct MiddlewareRegistration {
    /// Name, unique per owner.
    pub name: String,
    /// Priority (higher runs outermost).
    pub priority: i32,
    /// Routes the middleware applies to.
    pub scope: RouteScope,
    /// The middleware.
    pub middleware: Arc<dyn Middleware>,
}

impl MiddlewareRegistration {
    /// Creates a registration.
    pub fn new(
        name: &str,
        priority: i32,
        scope: RouteScope,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        Self {
            name: name.to_string(),
            priority,
            scope,
            middleware,
        }
    }
}

impl fmt::Debug for MiddlewareRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A published middleware.
pub struct MiddlewareEntry {
    /// Plugin that registered it.
    pub owner: String,
    /// Name, unique per owner.
    pub name: String,
    /// Priority (higher runs outermost).
    pub priority: i32,
    /// Global registration sequence, breaks priority ties.
    pub sequence: u64,
    /// Routes the middleware applies to.
    pub scope: RouteScope,
    /// The middleware.
    pub middleware: Arc<dyn Middleware>,
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

type Chain = Arc<[Arc<MiddlewareEntry>]>;

/// Immutable view of every registered middleware plus its route cache.
///
/// The cache belongs to the snapshot, so publishing a new table drops every
/// cached chain with it.
pub struct MiddlewareTable {
    entries: Vec<Arc<MiddlewareEntry>>,
    chains: DashMap<String, Chain>,
    cache_capacity: usize,
    generation: u64,
}

impl MiddlewareTable {
    fn empty(cache_capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            chains: DashMap::new(),
            cache_capacity,
            generation: 0,
        }
    }

    /// All entries in chain order.
    pub fn entries(&self) -> &[Arc<MiddlewareEntry>] {
        &self.entries
    }

    /// Number of publications that produced this table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of routes with a cached chain.
    pub fn cached_routes(&self) -> usize {
        self.chains.len()
    }

    /// Returns the ordered chain for `path`, building and caching it on first use.
    pub fn chain_for(&self, path: &str) -> Chain {
        if let Some(chain) = self.chains.get(path) {
            return Arc::clone(chain.value());
        }
        let chain: Chain = self
            .entries
            .iter()
            .filter(|e| e.scope.applies_to(path))
            .cloned()
            .collect();
        if self.chains.len() < self.cache_capacity {
            self.chains.insert(path.to_string(), Arc::clone(&chain));
        }
        chain
    }

    fn rebuilt(&self, entries: Vec<Arc<MiddlewareEntry>>) -> Self {
        let mut entries = entries;
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Self {
            entries,
            chains: DashMap::new(),
            cache_capacity: self.cache_capacity,
            generation: self.generation + 1,
        }
    }
}

impl fmt::Debug for MiddlewareTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareTable")
            .field("entries", &self.entries.len())
            .field("cached_routes", &self.chains.len())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Registry of route-scoped middleware.
pub struct MiddlewareRegistry {
    current: RwLock<Arc<MiddlewareTable>>,
    /// Serialises writers; holds the next registration sequence.
    writer: Mutex<u64>,
    default_timeout: Duration,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    ///
    /// `route_cache_capacity` bounds the per-snapshot chain cache and
    /// `default_timeout` bounds each link when the request has no deadline.
    pub fn new(route_cache_capacity: usize, default_timeout: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(MiddlewareTable::empty(route_cache_capacity))),
            writer: Mutex::new(0),
            default_timeout,
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<MiddlewareTable> {
        Arc::clone(&self.current.read())
    }

    /// Publishes a single middleware immediately.
    pub fn register(&self, owner: &str, registration: MiddlewareRegistration) -> PluginResult<()> {
        self.commit(owner, vec![registration])
    }

    /// Publishes a batch for `owner` in one swap.
    ///
    /// A duplicate `(owner, name)`, whether against the published table or
    /// inside the batch, rejects the whole batch.
    pub fn commit(&self, owner: &str, batch: Vec<MiddlewareRegistration>) -> PluginResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut sequence = self.writer.lock();
        let current = self.snapshot();

        let mut entries = current.entries.clone();
        for registration in batch {
            if entries
                .iter()
                .any(|e| e.owner == owner && e.name == registration.name)
            {
                return Err(PluginError::registration(
                    owner,
                    format!("middleware '{}' is already registered", registration.name),
                ));
            }
            info!(
                plugin = %owner,
                middleware = %registration.name,
                priority = registration.priority,
                "Middleware registered"
            );
            entries.push(Arc::new(MiddlewareEntry {
                owner: owner.to_string(),
                name: registration.name,
                priority: registration.priority,
                sequence: *sequence,
                scope: registration.scope,
                middleware: registration.middleware,
            }));
            *sequence += 1;
        }

        *self.current.write() = Arc::new(current.rebuilt(entries));
        Ok(())
    }

    /// Removes every middleware owned by `owner` in one swap.
    pub fn unregister_plugin(&self, owner: &str) -> usize {
        let _sequence = self.writer.lock();
        let current = self.snapshot();
        let entries: Vec<_> = current
            .entries
            .iter()
            .filter(|e| e.owner != owner)
            .cloned()
            .collect();
        let removed = current.entries.len() - entries.len();
        if removed > 0 {
            *self.current.write() = Arc::new(current.rebuilt(entries));
            info!(plugin = %owner, removed, "All middleware unregistered for plugin");
        }
        removed
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    /// Returns whether no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the generation of the current snapshot.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Runs `req` through the chain for its path and then `endpoint`.
    ///
    /// One snapshot is captured for the whole request.
    pub async fn execute(
        &self,
        req: MiddlewareRequest,
        endpoint: &dyn Endpoint,
        cancel: &CancellationToken,
    ) -> PluginResult<MiddlewareResponse> {
        let snapshot = self.snapshot();
        let chain = snapshot.chain_for(&req.path);
        debug!(path = %req.path, links = chain.len(), "Executing middleware chain");
        Next::new(&chain, endpoint, cancel, self.default_timeout)
            .run(req)
            .await
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("table", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(
            &self,
            req: MiddlewareRequest,
            next: Next<'_>,
        ) -> PluginResult<MiddlewareResponse> {
            let mut res = next.run(req).await?;
            if let Some(trail) = res.body.as_array_mut() {
                trail.push(json!(self.0));
            }
            Ok(res)
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware for Reject {
        async fn handle(
            &self,
            _req: MiddlewareRequest,
            _next: Next<'_>,
        ) -> PluginResult<MiddlewareResponse> {
            Ok(MiddlewareResponse::new(403, json!("forbidden")))
        }
    }

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, _req: MiddlewareRequest) -> PluginResult<MiddlewareResponse> {
            Ok(MiddlewareResponse::ok(json!([])))
        }
    }

    fn registry() -> MiddlewareRegistry {
        MiddlewareRegistry::new(16, Duration::from_secs(1))
    }

    fn reg(name: &str, priority: i32, scope: RouteScope, mw: impl Middleware + 'static) -> MiddlewareRegistration {
        MiddlewareRegistration::new(name, priority, scope, Arc::new(mw))
    }

    #[tokio::test]
    async fn test_chain_order_and_scope() {
        let registry = registry();
        registry
            .register("a", reg("inner", 10, RouteScope::Global, Tag("inner")))
            .expect("register");
        registry
            .register("b", reg("outer", 90, RouteScope::Global, Tag("outer")))
            .expect("register");
        registry
            .register(
                "c",
                reg("files", 50, RouteScope::routes(["/files/**"]).expect("valid"), Tag("files")),
            )
            .expect("register");

        let cancel = CancellationToken::new();
        let res = registry
            .execute(MiddlewareRequest::new("GET", "/files/1"), &Echo, &cancel)
            .await
            .expect("ok");
        // Innermost appends first.
        assert_eq!(res.body, json!(["inner", "files", "outer"]));

        let res = registry
            .execute(MiddlewareRequest::new("GET", "/health"), &Echo, &cancel)
            .await
            .expect("ok");
        assert_eq!(res.body, json!(["inner", "outer"]));
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let registry = registry();
        registry
            .register("guard", reg("deny", 1, RouteScope::Global, Reject))
            .expect("register");
        let res = registry
            .execute(MiddlewareRequest::new("POST", "/x"), &Echo, &CancellationToken::new())
            .await
            .expect("ok");
        assert_eq!(res.status, 403);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = registry();
        registry
            .register("a", reg("log", 1, RouteScope::Global, Reject))
            .expect("first");
        let err = registry
            .register("a", reg("log", 2, RouteScope::Global, Reject))
            .expect_err("duplicate");
        assert!(matches!(err, PluginError::Registration { .. }));
        registry
            .register("b", reg("log", 1, RouteScope::Global, Reject))
            .expect("other owner may reuse the name");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_mutation_drops_route_cache() {
        let registry = registry();
        registry
            .register("a", reg("log", 1, RouteScope::Global, Reject))
            .expect("register");
        let before = registry.snapshot();
        before.chain_for("/x");
        assert_eq!(before.cached_routes(), 1);

        assert_eq!(registry.unregister_plugin("a"), 1);
        let after = registry.snapshot();
        assert_eq!(after.cached_routes(), 0);
        assert!(after.chain_for("/x").is_empty());
        assert_eq!(before.chain_for("/x").len(), 1);
    }
}
