//! Hook system: typed hook definitions, snapshot registry and dispatcher.

pub mod definitions;
pub mod dispatcher;
pub mod registry;

pub use definitions::{HookAction, HookPayload, HookType};
pub use dispatcher::{DispatchResult, HookDispatcher};
pub use registry::{HookEntry, HookHandler, HookRegistration, HookRegistry, HookTable};
