//! Route-scoped middleware chains.

pub mod chain;
pub mod pattern;
pub mod registry;

pub use chain::{Endpoint, Middleware, MiddlewareRequest, MiddlewareResponse, Next};
pub use pattern::{RoutePattern, RouteScope};
pub use registry::{MiddlewareEntry, MiddlewareRegistration, MiddlewareRegistry, MiddlewareTable};
