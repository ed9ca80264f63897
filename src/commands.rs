//! Command execution.

use crate::config::{Config, OutputFormat};
use crate::Commands;
use colored::Colorize;
use lifecycle_core::{ContextValue, MachineDefinition, TransitionOutcome};
use serde_json::{json, Value};
use std::path::Path;

/// Formatted command output. `success` is false when a replay stopped on a
/// rejected event.
pub struct Report {
    pub output: String,
    pub success: bool,
}

impl Report {
    fn ok(output: String) -> Self {
        Self {
            output,
            success: true,
        }
    }
}

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands, config: &Config) -> Result<Report, Box<dyn std::error::Error>> {
    let format = config.output.format;

    match cmd {
        Commands::Validate { file } => {
            let def = load_definition(&file)?;
            let table = &def.table;
            let states: Vec<&str> = table.states().iter().map(|s| s.as_str()).collect();
            let terminal: Vec<&str> = table
                .terminal_states()
                .into_iter()
                .map(|s| s.as_str())
                .collect();

            if format == OutputFormat::Json {
                return Ok(Report::ok(format_json(&json!({
                    "machine": def.name,
                    "checksum": def.checksum,
                    "initial": def.initial.as_str(),
                    "states": states,
                    "transitions": table.rules().len(),
                    "terminal": terminal,
                }))));
            }

            Ok(Report::ok(format!(
                "{} machine {} (checksum: {})\n  States: {}\n  Initial: {}\n  Transitions: {}\n  Terminal: {}",
                "Valid".green(),
                def.name.cyan(),
                def.checksum,
                states.join(", "),
                def.initial.as_str().yellow(),
                table.rules().len(),
                if terminal.is_empty() {
                    "none".dimmed().to_string()
                } else {
                    terminal.join(", ")
                }
            )))
        }

        Commands::Events { file, state } => {
            let def = load_definition(&file)?;
            let state = state.unwrap_or_else(|| def.initial.as_str().to_string());
            if !def.table.has_state(&state) {
                return Err(format!("state '{}' is not declared by {}", state, def.name).into());
            }

            let events: Vec<&str> = def.table.events_from(&state).into_iter().collect();

            if format == OutputFormat::Json {
                return Ok(Report::ok(format_json(&json!({
                    "state": state,
                    "events": events,
                }))));
            }

            if events.is_empty() {
                return Ok(Report::ok(format!(
                    "{} is terminal: no events available",
                    state.yellow()
                )));
            }

            let mut output = format!("Events from {}:", state.yellow());
            for event in events {
                let target = def
                    .table
                    .lookup(event, &state)
                    .map(|s| s.as_str())
                    .unwrap_or("?");
                output.push_str(&format!("\n  {} -> {}", event.cyan(), target));
            }
            Ok(Report::ok(output))
        }

        Commands::Run {
            file,
            events,
            set,
            keep_going,
        } => {
            let def = load_definition(&file)?;
            let mut instance = def.instantiate();

            for assignment in &set {
                let (key, value) = parse_assignment(assignment)?;
                instance.set(key, value);
            }

            let mut outcomes = Vec::new();
            let mut success = true;
            for event in &events {
                let outcome = TransitionOutcome::from(&instance.transition(event));
                let applied = outcome.is_success();
                outcomes.push(outcome);
                if !applied {
                    success = false;
                    if !keep_going {
                        break;
                    }
                }
            }

            tracing::debug!(
                "Replayed {} of {} events on {}",
                outcomes.len(),
                events.len(),
                def.name
            );

            if format == OutputFormat::Json {
                let context: serde_json::Map<String, Value> = instance
                    .context()
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect();
                return Ok(Report {
                    output: format_json(&json!({
                        "outcomes": outcomes,
                        "final_state": instance.current_state(),
                        "history": instance.history(),
                        "context": context,
                    })),
                    success,
                });
            }

            let mut output = String::new();
            for outcome in &outcomes {
                match outcome {
                    TransitionOutcome::Applied { from, to, event, .. } => {
                        output.push_str(&format!(
                            "{} {}: {} -> {}\n",
                            "ok".green(),
                            event.cyan(),
                            from,
                            to
                        ));
                    }
                    TransitionOutcome::Rejected { error, reason, .. } => {
                        output.push_str(&format!("{} {}: {}\n", "rejected".red(), error, reason));
                    }
                }
            }
            output.push_str(&format!(
                "Final state: {}\nHistory: {} transition(s)",
                instance.current_state().as_str().yellow(),
                instance.history().len()
            ));

            Ok(Report { output, success })
        }
    }
}

/// Loads a definition file, choosing the parser by extension.
fn load_definition(path: &Path) -> Result<MachineDefinition, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "machine".to_string());

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let def = if is_yaml {
        MachineDefinition::from_yaml(name, 1, &content)?
    } else {
        let json: Value = serde_json::from_str(&content)?;
        MachineDefinition::from_json(name, 1, &json)?
    };
    Ok(def)
}

/// Parses `KEY=VALUE`; VALUE is JSON when it parses as JSON, else a string.
fn parse_assignment(arg: &str) -> Result<(String, ContextValue), Box<dyn std::error::Error>> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))?;
    if key.is_empty() {
        return Err(format!("empty context key in '{}'", arg).into());
    }

    let value = serde_json::from_str::<Value>(raw)
        .map(ContextValue::from)
        .unwrap_or_else(|_| ContextValue::from(raw));
    Ok((key.to_string(), value))
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
