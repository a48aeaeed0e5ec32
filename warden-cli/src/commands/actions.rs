use anyhow::anyhow;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use warden_core::{builtin_registry, ActionCategory, ActionDescriptor, WardenConfig};

pub fn cmd_actions(
    config: &WardenConfig,
    category: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let registry = builtin_registry(config)?;
    let category = category
        .map(|c| {
            ActionCategory::parse(c).ok_or_else(|| {
                anyhow!(
                    "Unknown category '{}'. Valid categories: {}",
                    c,
                    ActionCategory::all().map(|cat| cat.as_str()).join(", ")
                )
            })
        })
        .transpose()?;

    let descriptors: Vec<ActionDescriptor> = registry
        .get_all_action_schemas()
        .into_iter()
        .filter(|d| category.map(|c| d.category == c).unwrap_or(true))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("{}", "No actions registered.".yellow());
        return Ok(());
    }

    println!("{}", "Registered Actions".cyan().bold());
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Name").fg(Color::White),
            Cell::new("Category").fg(Color::White),
            Cell::new("Required").fg(Color::White),
            Cell::new("Description").fg(Color::White),
        ]);

    for descriptor in &descriptors {
        table.add_row(vec![
            Cell::new(&descriptor.name),
            category_cell(descriptor.category),
            Cell::new(required_parameters(descriptor).join(", ")),
            Cell::new(&descriptor.description),
        ]);
    }

    println!("{table}");
    println!();
    println!("  Total: {} actions", descriptors.len());

    Ok(())
}

fn category_cell(category: ActionCategory) -> Cell {
    let cell = Cell::new(category.as_str());
    match category {
        ActionCategory::Notification => cell.fg(Color::Cyan),
        ActionCategory::Remediation => cell.fg(Color::Red),
        ActionCategory::Investigation => cell.fg(Color::Blue),
        ActionCategory::Cloud => cell.fg(Color::Magenta),
        ActionCategory::Agent => cell.fg(Color::Yellow),
    }
}

fn required_parameters(descriptor: &ActionDescriptor) -> Vec<String> {
    descriptor.parameter_schema["required"]
        .as_array()
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_parameters() {
        let descriptor = ActionDescriptor {
            name: "block_ip".to_string(),
            description: "Block an address".to_string(),
            category: ActionCategory::Remediation,
            parameter_schema: json!({"type": "object", "required": ["ip", "reason"]}),
        };
        assert_eq!(required_parameters(&descriptor), vec!["ip", "reason"]);
    }

    #[test]
    fn test_required_parameters_absent() {
        let descriptor = ActionDescriptor {
            name: "noop".to_string(),
            description: String::new(),
            category: ActionCategory::Agent,
            parameter_schema: json!({"type": "object"}),
        };
        assert!(required_parameters(&descriptor).is_empty());
    }
}
