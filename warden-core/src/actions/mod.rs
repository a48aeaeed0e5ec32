pub mod builtin;
pub mod http;
mod registry;
mod schema;
mod traits;
mod types;

pub use builtin::{builtin_actions, builtin_registry, register_builtin_actions, BUILTIN_ACTIONS};
pub use registry::ActionRegistry;
pub use schema::{validate_against, ParameterValidator};
pub use traits::Action;
pub use types::{
    ActionCategory, ActionContext, ActionDescriptor, ActionResult, Actor, UserRole,
};
