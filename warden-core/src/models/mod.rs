mod event;
mod execution;
mod playbook;
mod severity;

pub use event::{Event, EventType};
pub use execution::{ExecutionStatus, PlaybookExecution, StepResult, TriggerSource};
pub use playbook::{Playbook, PlaybookStep, EXECUTION_TIME_WEIGHT};
pub use severity::Severity;
