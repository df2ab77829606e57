//! Shared types: typed identifiers and the capability vocabulary.

pub mod capability;
pub mod id;

pub use capability::{Capability, CapabilitySet};
pub use id::{EventId, RequestId, SubscriptionId};
