use anyhow::Context;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use warden_core::{
    load_playbooks_file, AutomationService, Event, ExecutionStatus, InMemoryPlaybookRepository,
    Playbook, PlaybookExecution, WardenConfig,
};

pub async fn cmd_run(config: WardenConfig, playbooks: &Path, events: &Path) -> anyhow::Result<()> {
    let playbooks = load_playbooks_file(playbooks)
        .with_context(|| format!("Failed to load playbooks from {}", playbooks.display()))?;
    let content = std::fs::read_to_string(events)
        .with_context(|| format!("Failed to read events from {}", events.display()))?;
    let events = parse_events(&content)?;

    println!(
        "{} {} events against {} playbooks",
        "Replaying".cyan().bold(),
        events.len(),
        playbooks.len()
    );
    println!();

    let names: HashMap<Uuid, String> = playbooks.iter().map(|p| (p.id, p.name.clone())).collect();
    let executions = replay(config, playbooks, &events).await?;

    if executions.is_empty() {
        println!("{}", "No playbook matched any event.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Playbook").fg(Color::White),
            Cell::new("Trigger").fg(Color::White),
            Cell::new("Entity").fg(Color::White),
            Cell::new("Status").fg(Color::White),
            Cell::new("Steps").fg(Color::White),
            Cell::new("Duration").fg(Color::White),
            Cell::new("Error").fg(Color::White),
        ]);

    for execution in &executions {
        let status_cell = match execution.status {
            ExecutionStatus::Completed => Cell::new("completed").fg(Color::Green),
            ExecutionStatus::Failed => Cell::new("failed").fg(Color::Red),
            ExecutionStatus::Running => Cell::new("running").fg(Color::Yellow),
        };
        let succeeded = execution.step_results.len() - execution.failed_steps();

        table.add_row(vec![
            Cell::new(
                names
                    .get(&execution.playbook_id)
                    .cloned()
                    .unwrap_or_else(|| execution.playbook_id.to_string()),
            ),
            Cell::new(execution.trigger_source.to_string()),
            Cell::new(execution.trigger_entity_id.as_deref().unwrap_or("-")),
            status_cell,
            Cell::new(format!("{}/{}", succeeded, execution.step_results.len())),
            Cell::new(
                execution
                    .duration_ms()
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(first_error(execution).unwrap_or("-")).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();

    let failed = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count();
    println!(
        "  Total: {} executions, {} completed, {} failed",
        executions.len(),
        executions.len() - failed,
        failed
    );

    Ok(())
}

/// Run the service over an in-memory repository until every queued execution
/// has finished. Executions come back oldest first.
pub async fn replay(
    config: WardenConfig,
    playbooks: Vec<Playbook>,
    events: &[Event],
) -> anyhow::Result<Vec<PlaybookExecution>> {
    let repository = Arc::new(InMemoryPlaybookRepository::with_playbooks(playbooks));
    let service = AutomationService::new(config, repository.clone())?;
    service.start().await?;

    for event in events {
        let reached = service.publish(event);
        debug!(
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            subscribers = reached,
            "Published replayed event"
        );
    }
    service.shutdown().await;

    Ok(repository.executions().await)
}

/// One JSON event per line; blank lines are ignored.
pub fn parse_events(content: &str) -> anyhow::Result<Vec<Event>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", index + 1))
        })
        .collect()
}

fn first_error(execution: &PlaybookExecution) -> Option<&str> {
    execution
        .step_results
        .iter()
        .find_map(|step| step.result.error.as_deref())
        .or(execution.error.as_deref())
}
