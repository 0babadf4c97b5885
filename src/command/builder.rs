// src/command/builder.rs

//! Task spec → engine invocation.

use std::sync::LazyLock;

use regex::Regex;

use crate::command::catalog::{ArgStyle, Capability, Catalog, CatalogEntry, CommandSpec};
use crate::command::{Invocation, InvocationPayload, SettleClass, TaskDescriptor};
use crate::errors::{AutoflowError, Result};
use crate::flow::{ParamValue, TaskSpec};

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("static regex is valid"));

/// Translate one task into an engine invocation.
///
/// Total over every `kind`: unknown kinds and untranslatable parameter
/// shapes come back as [`AutoflowError::Configuration`].
pub fn build(task: &TaskSpec, catalog: &Catalog) -> Result<Invocation> {
    let entry = catalog
        .lookup(task.kind())
        .ok_or_else(|| config_error(task, format!("unknown task kind '{}'", task.kind())))?;

    let payload = match entry {
        CatalogEntry::Builtin(spec) => build_command(task, spec)?,
        CatalogEntry::Capability(cap) => {
            InvocationPayload::Descriptor(build_descriptor(task, cap)?)
        }
    };

    let settle = if entry.launches_app() {
        SettleClass::Launch
    } else {
        SettleClass::Standard
    };

    Ok(Invocation {
        task_id: task.id().clone(),
        kind: task.kind().to_string(),
        label: task.id().to_string(),
        payload,
        settle,
        recognition: entry.recognition(),
    })
}

fn build_command(task: &TaskSpec, spec: &CommandSpec) -> Result<InvocationPayload> {
    if let Some((name, _)) = task
        .params
        .iter()
        .find(|(name, value)| !value.is_empty() && spec.field(name).is_none())
    {
        return Err(config_error(
            task,
            format!("parameter '{name}' is not accepted by '{}'", spec.command),
        ));
    }

    let mut positionals = Vec::new();
    let mut flags = Vec::new();

    for field in spec.fields {
        let Some(value) = task.params.get(field.name) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }

        match field.style {
            ArgStyle::Positional => {
                positionals.extend(arg_tokens(task, field.name, value, field.list)?);
            }
            ArgStyle::Option(flag) => {
                for token in arg_tokens(task, field.name, value, field.list)? {
                    flags.push(flag.to_string());
                    flags.push(token);
                }
            }
            ArgStyle::Switch(flag) => {
                if value.is_truthy() {
                    flags.push(flag.to_string());
                }
            }
        }
    }

    positionals.extend(flags);
    Ok(InvocationPayload::Command {
        command: spec.command.to_string(),
        args: positionals,
    })
}

/// Render a value as zero or more command-line tokens.
fn arg_tokens(task: &TaskSpec, name: &str, value: &ParamValue, split: bool) -> Result<Vec<String>> {
    match value {
        ParamValue::Text(s) if split => Ok(split_list(s)),
        ParamValue::List(items) => {
            let mut tokens = Vec::with_capacity(items.len());
            for item in items.iter().filter(|i| !i.is_empty()) {
                let token = item.as_arg().ok_or_else(|| {
                    config_error(task, format!("parameter '{name}' contains a nested list"))
                })?;
                tokens.push(token);
            }
            Ok(tokens)
        }
        other => Ok(other.as_arg().into_iter().collect()),
    }
}

fn build_descriptor(task: &TaskSpec, cap: &Capability) -> Result<TaskDescriptor> {
    let mut params = serde_json::Map::new();

    for (name, value) in task.params.iter() {
        if value.is_empty() {
            continue;
        }
        let keep_text = cap.keep_as_text.contains(name);
        let json = match value {
            ParamValue::Text(s) if cap.list_fields.contains(name) => {
                if is_bracketed(s) {
                    serde_json::Value::String(s.trim().to_string())
                } else {
                    split_list(s).into_iter().map(serde_json::Value::String).collect()
                }
            }
            other => to_json(task, name, other, keep_text)?,
        };
        params.insert(name.clone(), json);
    }

    Ok(TaskDescriptor {
        name: task.kind().to_string(),
        type_tag: cap.type_tag.clone(),
        params,
    })
}

fn to_json(
    task: &TaskSpec,
    name: &str,
    value: &ParamValue,
    keep_text: bool,
) -> Result<serde_json::Value> {
    let json = match value {
        ParamValue::Null => serde_json::Value::Null,
        ParamValue::Bool(b) => serde_json::Value::Bool(*b),
        ParamValue::Integer(n) => serde_json::Value::from(*n),
        ParamValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                config_error(task, format!("parameter '{name}' is not a finite number"))
            })?,
        ParamValue::Text(s) => {
            let s = s.trim();
            if keep_text || is_bracketed(s) {
                serde_json::Value::String(s.to_string())
            } else {
                coerce_numeric(s).unwrap_or_else(|| serde_json::Value::String(s.to_string()))
            }
        }
        ParamValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter().filter(|i| !i.is_empty()) {
                if matches!(item, ParamValue::List(_)) {
                    return Err(config_error(
                        task,
                        format!("parameter '{name}' contains a nested list"),
                    ));
                }
                out.push(to_json(task, name, item, keep_text)?);
            }
            serde_json::Value::Array(out)
        }
    };
    Ok(json)
}

/// `"3"` → 3, `"0.3"` → 0.3; anything else is not numeric-looking.
fn coerce_numeric(s: &str) -> Option<serde_json::Value> {
    if !NUMERIC.is_match(s) {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(serde_json::Value::from(n));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
}

fn is_bracketed(s: &str) -> bool {
    let s = s.trim();
    s.len() >= 2 && s.starts_with('[') && s.ends_with(']')
}

/// Split comma-separated text into trimmed, non-empty tokens. Bracketed
/// text is a pre-formatted literal and passes through as one token.
fn split_list(s: &str) -> Vec<String> {
    if is_bracketed(s) {
        return vec![s.trim().to_string()];
    }
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn config_error(task: &TaskSpec, reason: String) -> AutoflowError {
    AutoflowError::Configuration {
        task_id: task.id().clone(),
        kind: task.kind().to_string(),
        reason,
    }
}
