use anyhow::{anyhow, bail};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use std::sync::Arc;
use uuid::Uuid;
use warden_core::{
    builtin_registry, Notification, NotificationManager, NotificationSummary, Severity,
    WardenConfig,
};

pub async fn cmd_notify(
    config: &WardenConfig,
    severity: &str,
    title: &str,
    message: &str,
    organization: Option<Uuid>,
) -> anyhow::Result<()> {
    let severity = parse_severity(severity)?;
    let registry = Arc::new(builtin_registry(config)?);
    let manager = NotificationManager::new(registry, config.notifications.clone());

    let notification = Notification::new(
        title,
        message,
        severity,
        organization.unwrap_or_else(Uuid::nil),
    )
    .with_field("source", serde_json::json!("warden-cli"));

    println!(
        "{} [{}] {}",
        "Sending".cyan().bold(),
        severity.as_str().to_uppercase(),
        title
    );
    println!();

    let summary = manager.notify(&notification).await;
    print_summary(&summary);

    if summary.success {
        Ok(())
    } else {
        bail!(
            "{} channel(s) failed{}",
            summary.failed,
            summary
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        )
    }
}

fn parse_severity(value: &str) -> anyhow::Result<Severity> {
    Severity::parse(value).ok_or_else(|| {
        anyhow!(
            "Unknown severity '{}'. Valid severities: {}",
            value,
            Severity::all().map(|s| s.as_str()).join(", ")
        )
    })
}

fn print_summary(summary: &NotificationSummary) {
    if summary.skipped {
        let reason = summary.reason.as_deref().unwrap_or("skipped");
        if summary.success {
            println!("  {} {}", "-".dimmed(), reason.dimmed());
        } else {
            println!("  {} {}", "!".yellow(), reason.yellow());
        }
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Channel").fg(Color::White),
            Cell::new("Action").fg(Color::White),
            Cell::new("Result").fg(Color::White),
            Cell::new("Duration").fg(Color::White),
            Cell::new("Error").fg(Color::White),
        ]);

    for outcome in &summary.channels {
        let result = if outcome.success {
            Cell::new("✓ sent").fg(Color::Green)
        } else {
            Cell::new("✗ failed").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(outcome.channel.as_str()),
            Cell::new(&outcome.action),
            result,
            Cell::new(format!("{}ms", outcome.duration_ms)),
            Cell::new(outcome.error.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "  {} sent, {} failed",
        summary.successful.to_string().green(),
        summary.failed.to_string().red()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_severity() {
        assert_eq!(parse_severity("HIGH").unwrap(), Severity::High);
        let err = parse_severity("urgent").unwrap_err().to_string();
        assert!(err.contains("low, medium, high, critical"));
    }

    #[tokio::test]
    async fn test_notify_without_channels_is_skipped() {
        let result = cmd_notify(&WardenConfig::default(), "critical", "Test", "hello", None).await;
        assert!(result.is_ok());
    }
}
