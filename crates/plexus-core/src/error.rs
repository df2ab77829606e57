//! Unified application error types for Plexus.
//!
//! Every crate maps its internal errors into [`AppError`] for consistent
//! propagation through the ? operator at the host boundary.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// A manifest or plugin configuration is malformed or invalid.
    Manifest,
    /// A dependency cycle, or a missing/incompatible required dependency.
    Dependency,
    /// A capability was not granted to the caller.
    Permission,
    /// An invalid lifecycle transition, or a lifecycle callback failed.
    Lifecycle,
    /// A duplicate or invalid hook/middleware registration.
    Registration,
    /// A reloaded instance failed after the previous one was torn down.
    Reload,
    /// An unknown, unloaded or unavailable service was requested.
    Service,
    /// A hook, middleware or event handler returned an error.
    Handler,
    /// Plugin storage failed.
    Storage,
    /// An operation exceeded its deadline.
    Timeout,
    /// An operation was cancelled.
    Cancelled,
    /// The requested resource was not found.
    NotFound,
    /// Host configuration could not be loaded.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "MANIFEST"),
            Self::Dependency => write!(f, "DEPENDENCY"),
            Self::Permission => write!(f, "PERMISSION"),
            Self::Lifecycle => write!(f, "LIFECYCLE"),
            Self::Registration => write!(f, "REGISTRATION"),
            Self::Reload => write!(f, "RELOAD"),
            Self::Service => write!(f, "SERVICE"),
            Self::Handler => write!(f, "HANDLER"),
            Self::Storage => write!(f, "STORAGE"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// The unified application error used at the Plexus host boundary.
///
/// Crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Manifest, message)
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lifecycle, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Storage, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
