//! Plugin lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// Lifecycle state of a plugin instance.
///
/// Only the [`PluginManager`](crate::manager::PluginManager) moves plugins
/// between states. Transitions are forward-only except the reload path,
/// which re-enters `Initializing` from `Stopped`, `Cleaning` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Registered in the catalog, no live instance.
    Unloaded,
    /// `initialize` is running.
    Initializing,
    /// `initialize` succeeded.
    Initialized,
    /// `start` is running.
    Starting,
    /// Serving.
    Started,
    /// `stop` is running.
    Stopping,
    /// Stopped, instance still alive.
    Stopped,
    /// `cleanup` is running and registrations are being released.
    Cleaning,
    /// A transition failed; the triggering error is kept by the manager.
    Failed,
}

impl PluginState {
    /// Returns the snake_case name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Cleaning => "cleaning",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: PluginState) -> bool {
        use PluginState::*;

        if next == Failed {
            return true;
        }

        matches!(
            (*self, next),
            (Unloaded, Initializing)
                | (Initializing, Initialized)
                | (Initialized, Starting)
                | (Initialized, Cleaning)
                | (Starting, Started)
                | (Started, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Cleaning)
                | (Stopped, Initializing)
                | (Cleaning, Unloaded)
                | (Cleaning, Initializing)
                | (Failed, Cleaning)
                | (Failed, Initializing)
        )
    }

    /// Returns whether dependents may initialize against this state.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Initialized | Self::Starting | Self::Started)
    }

    /// Validates the transition to `next` for `plugin`.
    pub(crate) fn check(&self, plugin: &str, next: PluginState) -> PluginResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(PluginError::InvalidTransition {
                plugin: plugin.to_string(),
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        use PluginState::*;
        let path = [
            Unloaded,
            Initializing,
            Initialized,
            Starting,
            Started,
            Stopping,
            Stopped,
            Cleaning,
            Unloaded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_backwards_moves_are_rejected() {
        assert!(!PluginState::Started.can_transition_to(PluginState::Initialized));
        assert!(!PluginState::Unloaded.can_transition_to(PluginState::Started));
        assert!(!PluginState::Started.can_transition_to(PluginState::Cleaning));
    }

    #[test]
    fn test_reload_path() {
        assert!(PluginState::Stopped.can_transition_to(PluginState::Initializing));
        assert!(PluginState::Cleaning.can_transition_to(PluginState::Initializing));
        assert!(PluginState::Failed.can_transition_to(PluginState::Initializing));
    }

    #[test]
    fn test_failed_reachable_from_any_state() {
        assert!(PluginState::Starting.can_transition_to(PluginState::Failed));
        assert!(PluginState::Cleaning.can_transition_to(PluginState::Failed));
        assert!(PluginState::Unloaded.can_transition_to(PluginState::Failed));
    }

    #[test]
    fn test_check_reports_transition() {
        let err = PluginState::Unloaded
            .check("a", PluginState::Started)
            .expect_err("invalid");
        assert!(matches!(
            err,
            PluginError::InvalidTransition {
                from: PluginState::Unloaded,
                to: PluginState::Started,
                ..
            }
        ));
    }
}
