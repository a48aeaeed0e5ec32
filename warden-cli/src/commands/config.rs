use anyhow::Context;
use colored::Colorize;
use warden_core::{get_config_dir, WardenConfig};

pub fn cmd_config(config: &WardenConfig, json: bool) -> anyhow::Result<()> {
    let redacted = config.redacted();

    if json {
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    println!("{}", "Effective Configuration".cyan().bold());
    if let Some(dir) = get_config_dir() {
        println!("  {} {}", "User config dir:".dimmed(), dir.display());
    }
    println!();

    let rendered = toml::to_string_pretty(&redacted).context("Failed to render configuration")?;
    println!("{}", rendered);

    Ok(())
}
