use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden_core::{CliErrorDisplay, LoggingConfig, WardenConfig, WardenError};

mod commands;

use commands::{cmd_actions, cmd_config, cmd_notify, cmd_run, cmd_validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "warden")]
#[command(version = VERSION)]
#[command(about = "Warden - event-driven security playbooks and notification fan-out")]
#[command(long_about = r#"
Warden reacts to security events by running playbooks: ordered steps that call
notification, remediation, investigation, cloud and agent actions.

Use 'warden validate' to check a playbook file, 'warden run' to replay events
against it, and 'warden notify' to test the configured notification channels.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List registered actions and their parameter schemas")]
    Actions {
        #[arg(short, long, help = "Only show one category (notification, remediation, ...)")]
        category: Option<String>,

        #[arg(long, help = "Print descriptors as JSON")]
        json: bool,
    },

    #[command(about = "Check a playbook file against the action registry")]
    Validate {
        #[arg(help = "YAML or JSON playbook file")]
        file: PathBuf,
    },

    #[command(about = "Replay newline-delimited JSON events against a playbook file")]
    Run {
        #[arg(help = "YAML or JSON playbook file")]
        playbooks: PathBuf,

        #[arg(help = "One JSON event per line")]
        events: PathBuf,
    },

    #[command(about = "Send a test notification through every enabled channel")]
    Notify {
        #[arg(short, long, default_value = "medium")]
        severity: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        message: String,

        #[arg(long, help = "Organization the notification belongs to")]
        organization: Option<uuid::Uuid>,
    },

    #[command(about = "Print the effective configuration with secrets redacted")]
    Config {
        #[arg(long, help = "Print as JSON instead of TOML")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match WardenConfig::load() {
        Ok(config) => config,
        Err(e) => {
            let e = WardenError::from(e);
            eprint!("{}: {}", "Configuration error".red().bold(), CliErrorDisplay::new(&e));
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.logging);

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}: {}", "Error".red().bold(), render_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Warden errors anywhere in the chain get their suggestion printed.
fn render_error(e: &anyhow::Error) -> String {
    match e.chain().find_map(|cause| cause.downcast_ref::<WardenError>()) {
        Some(err) if e.chain().count() > 1 => format!("{}\n  {}", e, CliErrorDisplay::new(err)),
        Some(err) => CliErrorDisplay::new(err).to_string(),
        None => format!("{:#}\n", e),
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn run(cli: Cli, config: WardenConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Actions { category, json } => cmd_actions(&config, category.as_deref(), json),
        Commands::Validate { file } => cmd_validate(&config, &file),
        Commands::Run { playbooks, events } => cmd_run(config, &playbooks, &events).await,
        Commands::Notify {
            severity,
            title,
            message,
            organization,
        } => cmd_notify(&config, &severity, &title, &message, organization).await,
        Commands::Config { json } => cmd_config(&config, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_render_error_adds_suggestion() {
        let err = anyhow::Error::from(WardenError::ActionNotFound("format_disk".to_string()));
        let rendered = render_error(&err);
        assert!(rendered.contains("format_disk"));
        assert!(rendered.contains("Suggestion: Run 'warden actions'"));
    }

    #[test]
    fn test_render_error_keeps_context() {
        let result: Result<(), WardenError> = Err(WardenError::ChannelNotConfigured("slack".to_string()));
        let err = result.context("Failed to send test notification").unwrap_err();

        let rendered = render_error(&err);
        assert!(rendered.starts_with("Failed to send test notification\n"));
        assert!(rendered.contains("Suggestion:"));
    }

    #[test]
    fn test_render_error_plain() {
        let err = anyhow::anyhow!("2 problem(s) found");
        assert_eq!(render_error(&err), "2 problem(s) found\n");
    }
}
