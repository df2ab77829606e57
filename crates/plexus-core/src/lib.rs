//! # plexus-core
//!
//! Core crate for the Plexus extension runtime. Contains the configuration
//! schemas, typed identifiers, the capability vocabulary shared between the
//! host and its extensions, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Plexus crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
pub use types::capability::{Capability, CapabilitySet};
