//! Supervision of plugin background tasks.
//!
//! Every long-running task a plugin starts goes through its
//! [`TaskSupervisor`], which hands the task a cancellation token derived from
//! the plugin's own token. Stopping the plugin cancels that token and waits,
//! up to a bound, for every task to finish before cleanup proceeds.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::safety::panic_message;

/// Outcome of [`TaskSupervisor::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskShutdown {
    /// Tasks that finished after cancellation.
    pub joined: usize,
    /// Tasks still running at the deadline and aborted.
    pub aborted: Vec<String>,
}

struct Tasks {
    set: JoinSet<()>,
    next_id: u64,
    closed: bool,
}

/// Owns the background tasks of one plugin instance.
pub struct TaskSupervisor {
    plugin: String,
    token: CancellationToken,
    tasks: Mutex<Tasks>,
    /// Tasks still running, by spawn order.
    running: Arc<Mutex<BTreeMap<u64, String>>>,
}

impl TaskSupervisor {
    /// Creates a supervisor for `plugin`.
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            token: CancellationToken::new(),
            tasks: Mutex::new(Tasks {
                set: JoinSet::new(),
                next_id: 0,
                closed: false,
            }),
            running: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Spawns `task` on the current runtime.
    ///
    /// The task receives a token that is cancelled when the plugin stops and
    /// must return promptly once it fires. Errors and panics are logged.
    pub fn spawn<F, Fut>(&self, name: &str, task: F) -> PluginResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(self.refuse(name));
        }
        // Built before locking: the closure may itself spawn through the context.
        let fut = task(self.token.child_token());

        let mut tasks = self.tasks.lock();
        if tasks.closed || self.token.is_cancelled() {
            return Err(self.refuse(name));
        }
        let id = tasks.next_id;
        tasks.next_id += 1;
        self.running.lock().insert(id, name.to_string());

        let plugin = self.plugin.clone();
        let task_name = name.to_string();
        let running = Arc::clone(&self.running);
        tasks.set.spawn(async move {
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => debug!(plugin = %plugin, task = %task_name, "Background task finished"),
                Ok(Err(err)) => {
                    warn!(plugin = %plugin, task = %task_name, error = %err, "Background task failed");
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(plugin = %plugin, task = %task_name, panic = %message, "Background task panicked");
                }
            }
            running.lock().remove(&id);
        });
        info!(plugin = %self.plugin, task = %name, "Background task started");
        Ok(())
    }

    fn refuse(&self, name: &str) -> PluginError {
        PluginError::lifecycle(&self.plugin, format!("cannot spawn task '{name}' while stopping"))
    }

    /// Number of tasks not yet reaped.
    pub fn active(&self) -> usize {
        self.tasks.lock().set.len()
    }

    /// Returns whether the supervisor has been shut down.
    pub fn is_closed(&self) -> bool {
        self.tasks.lock().closed || self.token.is_cancelled()
    }

    /// Cancels every task, waits up to `timeout`, then aborts stragglers.
    ///
    /// The supervisor refuses new tasks afterwards.
    pub async fn shutdown(&self, timeout: Duration) -> TaskShutdown {
        self.token.cancel();
        let mut set = {
            let mut tasks = self.tasks.lock();
            tasks.closed = true;
            std::mem::take(&mut tasks.set)
        };

        let mut report = TaskShutdown::default();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(_)) => report.joined += 1,
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    report.aborted = std::mem::take(&mut *self.running.lock())
                        .into_values()
                        .collect();
                    warn!(
                        plugin = %self.plugin,
                        aborted = ?report.aborted,
                        "Background tasks ignored cancellation and were aborted"
                    );
                    break;
                }
            }
        }
        if report.joined > 0 {
            debug!(plugin = %self.plugin, joined = report.joined, "Background tasks joined");
        }
        report
    }
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("plugin", &self.plugin)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_cooperative_task_is_joined() {
        let supervisor = TaskSupervisor::new("cleaner");
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        supervisor
            .spawn("sweep", move |token| async move {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .expect("spawn");
        assert_eq!(supervisor.active(), 1);

        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.joined, 1);
        assert!(report.aborted.is_empty());
        assert!(observed.load(Ordering::SeqCst));
        assert!(supervisor.spawn("late", |_| async { Ok(()) }).is_err());
    }

    #[tokio::test]
    async fn test_task_closure_can_spawn_a_sibling() {
        let supervisor = Arc::new(TaskSupervisor::new("nested"));
        let inner = Arc::clone(&supervisor);
        supervisor
            .spawn("outer", move |token| {
                inner
                    .spawn("inner", |token| async move {
                        token.cancelled().await;
                        Ok(())
                    })
                    .expect("inner spawn");
                async move {
                    token.cancelled().await;
                    Ok(())
                }
            })
            .expect("outer spawn");
        assert_eq!(supervisor.active(), 2);

        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.joined, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_task_is_aborted() {
        let supervisor = TaskSupervisor::new("stubborn");
        supervisor
            .spawn("forever", |_token| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .expect("spawn");

        let report = supervisor.shutdown(Duration::from_millis(100)).await;
        assert_eq!(report.joined, 0);
        assert_eq!(report.aborted, vec!["forever".to_string()]);
    }
}
