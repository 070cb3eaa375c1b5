//! Service Module
//!
//! Business logic layer for the server.
//! Services sit between the API and the repositories and hold the domain rules.

pub mod auth;
pub mod builtins;
pub mod dispatcher;
pub mod registry;
pub mod running;

// Re-export for convenience
pub use auth::{AuthStrategy, Authorizer, Groups, StrategyAuthorizer};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher};
pub use registry::{CommandDescriptor, CommandRegistry};
pub use running::RunningJobs;
