mod executor;
mod repository;

pub use executor::{ExecutionRequest, PlaybookExecutor};
pub use repository::{
    load_playbooks_file, parse_playbooks, InMemoryPlaybookRepository, PlaybookRepository,
};
