//! Convenience result type alias for Plexus.

use crate::error::AppError;

/// A specialized `Result` type for host-level Plexus operations.
///
/// Extension-facing code uses the richer `PluginError` from `plexus-plugin`,
/// which converts into [`AppError`] at the host boundary.
pub type AppResult<T> = Result<T, AppError>;
