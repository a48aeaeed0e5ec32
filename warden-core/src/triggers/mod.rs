mod conditions;
mod engine;
mod path;
mod template;

pub use conditions::{ConditionOp, FieldCondition, TriggerCondition};
pub use engine::TriggerEngine;
pub use path::resolve_path;
pub use template::{placeholders, TemplateScope};
