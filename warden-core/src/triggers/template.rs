//! `{{path}}` substitution for step parameter templates.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use crate::actions::ActionContext;
use crate::models::{Event, StepResult};

use super::path::resolve_path;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
});

/// Values visible to a template: `event`, `data`, `context` and `steps`.
#[derive(Debug, Clone)]
pub struct TemplateScope {
    root: Value,
}

impl TemplateScope {
    pub fn new(event: Option<&Event>, data: &Map<String, Value>, ctx: &ActionContext) -> Self {
        Self {
            root: json!({
                "event": event.map(Event::to_value).unwrap_or(Value::Null),
                "data": Value::Object(data.clone()),
                "context": ctx.to_value(),
                "steps": [],
            }),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Expose a finished step as `steps.N`.
    pub fn push_step(&mut self, step: &StepResult) {
        let value = serde_json::to_value(step).unwrap_or(Value::Null);
        if let Some(Value::Array(steps)) = self.root.get_mut("steps") {
            steps.push(value);
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.root, path)
    }

    /// Render every string leaf of `template`. Objects and arrays are walked
    /// recursively; other values are copied.
    pub fn render(&self, template: &Value) -> Value {
        match template {
            Value::String(s) => self.render_str(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn render_str(&self, s: &str) -> Value {
        let trimmed = s.trim();
        let Some(caps) = PLACEHOLDER_RE.captures(trimmed) else {
            return Value::String(s.to_string());
        };
        if let Some(m) = caps.get(0) {
            if m.start() == 0 && m.end() == trimmed.len() {
                return self.lookup(&caps[1]).cloned().unwrap_or(Value::Null);
            }
        }

        let rendered = PLACEHOLDER_RE.replace_all(s, |caps: &regex::Captures| {
            self.lookup(&caps[1]).map(stringify).unwrap_or_default()
        });
        Value::String(rendered.into_owned())
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Placeholder paths referenced anywhere in `template`.
pub fn placeholders(template: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_placeholders(template, &mut found);
    found
}

fn collect_placeholders(template: &Value, found: &mut Vec<String>) {
    match template {
        Value::String(s) => {
            found.extend(PLACEHOLDER_RE.captures_iter(s).map(|c| c[1].to_string()));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}
