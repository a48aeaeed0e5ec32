use anyhow::{bail, Context};
use colored::Colorize;
use std::path::Path;
use warden_core::triggers::placeholders;
use warden_core::{builtin_registry, load_playbooks_file, ActionRegistry, Playbook, WardenConfig};

/// One problem found in a playbook file.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub playbook: String,
    pub step: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(index) => write!(f, "{} (step {}): {}", self.playbook, index + 1, self.message),
            None => write!(f, "{}: {}", self.playbook, self.message),
        }
    }
}

pub fn cmd_validate(config: &WardenConfig, file: &Path) -> anyhow::Result<()> {
    let playbooks = load_playbooks_file(file)
        .with_context(|| format!("Failed to load playbooks from {}", file.display()))?;
    let registry = builtin_registry(config)?;

    println!(
        "{} {} ({} playbooks)",
        "Validating".cyan().bold(),
        file.display(),
        playbooks.len()
    );
    println!();

    let findings = check_playbooks(&playbooks, &registry);
    for playbook in &playbooks {
        let own: Vec<&Finding> = findings.iter().filter(|f| f.playbook == playbook.name).collect();
        if own.is_empty() {
            println!("  {} {}", "✓".green(), playbook.name);
        } else {
            println!("  {} {}", "✗".red(), playbook.name);
            for finding in own {
                match finding.step {
                    Some(index) => println!("      step {}: {}", index + 1, finding.message),
                    None => println!("      {}", finding.message),
                }
            }
        }
    }
    println!();

    if findings.is_empty() {
        println!("{}", "All playbooks are valid.".green());
        Ok(())
    } else {
        bail!("{} problem(s) found", findings.len())
    }
}

/// Structural checks, unknown actions, condition sanity and, for steps
/// without placeholders, the action's parameter schema.
pub fn check_playbooks(playbooks: &[Playbook], registry: &ActionRegistry) -> Vec<Finding> {
    let mut findings = Vec::new();

    for playbook in playbooks {
        let mut report = |step: Option<usize>, message: String| {
            findings.push(Finding {
                playbook: playbook.name.clone(),
                step,
                message,
            })
        };

        if let Err(e) = playbook.validate() {
            report(None, e.to_string());
        }

        if let Some(condition) = &playbook.trigger_conditions {
            if let Err(e) = condition.validate() {
                report(None, format!("invalid trigger condition: {}", e));
            }
        }

        for (index, step) in playbook.steps.iter().enumerate() {
            if !registry.contains(&step.action_name) {
                report(Some(index), format!("unknown action '{}'", step.action_name));
                continue;
            }
            if placeholders(&step.parameter_template).is_empty() {
                if let Err(e) = registry.validate_parameters(&step.action_name, &step.parameter_template) {
                    report(Some(index), e.to_string());
                }
            }
        }
    }

    findings
}
