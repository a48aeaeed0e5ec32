pub mod actions;
pub mod config;
pub mod notify;
pub mod run;
pub mod validate;

pub use actions::cmd_actions;
pub use config::cmd_config;
pub use notify::cmd_notify;
pub use run::cmd_run;
pub use validate::cmd_validate;
