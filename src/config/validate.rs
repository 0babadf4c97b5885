// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::command::{catalog, Capability, Catalog};
use crate::config::model::{
    CapabilityConfig, ConfigFile, EngineSection, EngineSettings, RawConfigFile, TaskConfig,
};
use crate::engine::RunnerOptions;
use crate::errors::{AutoflowError, Result};
use crate::flow::{TaskFlow, TaskId, TaskSpec};
use crate::monitor::MonitorOptions;
use crate::schedule::{parse_time, ScheduleConfig};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AutoflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw.engine)?;
        let catalog = build_catalog(&raw)?;
        let flow = build_flow("flow", &raw.flow, &catalog)?;

        let schedule = match &raw.schedule {
            Some(section) => {
                let times = section
                    .times
                    .iter()
                    .map(|t| {
                        parse_time(t).map_err(|e| config_err(format!("[schedule].times: {e}")))
                    })
                    .collect::<Result<_>>()?;
                let flow = match &section.flow {
                    Some(tasks) => build_flow("schedule.flow", tasks, &catalog)?,
                    None => flow.clone(),
                };
                Some(ScheduleConfig {
                    enabled: section.enabled,
                    times,
                    flow,
                })
            }
            None => None,
        };

        Ok(ConfigFile::new_unchecked(
            engine,
            raw.storage,
            raw.reference,
            catalog,
            flow,
            schedule,
        ))
    }
}

fn config_err(msg: impl Into<String>) -> AutoflowError {
    AutoflowError::Config(msg.into())
}

fn validate_engine(section: &EngineSection) -> Result<EngineSettings> {
    if section.program.trim().is_empty() {
        return Err(config_err("[engine].program must not be empty"));
    }

    let field = |name: &str, raw: &str| -> Result<Duration> {
        parse_duration(raw).map_err(|e| config_err(format!("[engine].{name}: {e}")))
    };

    let poll_interval = field("poll_interval", &section.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(config_err("[engine].poll_interval must be > 0"));
    }

    let runner = RunnerOptions {
        settle_delay: field("settle_delay", &section.settle_delay)?,
        launch_settle_delay: field("launch_settle_delay", &section.launch_settle_delay)?,
        stop_timeout: field("stop_timeout", &section.stop_timeout)?,
        monitor: MonitorOptions {
            poll_interval,
            max_backoff: field("max_backoff", &section.max_backoff)?,
            lost_contact_after: field("lost_contact_after", &section.lost_contact_after)?,
            stale_after: field("stale_after", &section.stale_after)?,
        },
    };

    Ok(EngineSettings {
        program: section.program.clone(),
        log_path: section.log_path.clone(),
        task_dir: section.task_dir.clone(),
        runner,
    })
}

fn build_catalog(raw: &RawConfigFile) -> Result<Catalog> {
    let mut catalog = Catalog::builtin();
    for (kind, cfg) in &raw.capability {
        if catalog::builtin(kind).is_some() {
            return Err(config_err(format!(
                "[capability.{kind}] shadows the built-in command '{kind}'"
            )));
        }
        catalog.insert(capability(kind, cfg)?);
    }
    Ok(catalog)
}

fn capability(kind: &str, cfg: &CapabilityConfig) -> Result<Capability> {
    if cfg.type_tag.trim().is_empty() {
        return Err(config_err(format!("[capability.{kind}].type must not be empty")));
    }
    let mut cap = Capability::new(kind, cfg.type_tag.clone());
    for field in &cfg.keep_as_text {
        cap = cap.keep_as_text(field);
    }
    for field in &cfg.list_fields {
        cap = cap.list_field(field);
    }
    cap.launches_app = cfg.launches_app;
    cap.recognition = cfg.recognition;
    Ok(cap)
}

fn build_flow(section: &str, tasks: &[TaskConfig], catalog: &Catalog) -> Result<TaskFlow> {
    let mut seen = HashSet::new();
    let mut flow = TaskFlow::default();

    for (idx, task) in tasks.iter().enumerate() {
        if !catalog.contains(&task.kind) {
            return Err(config_err(format!(
                "[[{section}]] entry {idx} has unknown kind '{}'",
                task.kind
            )));
        }

        let id = match &task.id {
            Some(id) if id.trim().is_empty() => {
                return Err(config_err(format!("[[{section}]] entry {idx} has an empty id")));
            }
            Some(id) => TaskId::new(id.clone()),
            None => TaskId::generate(),
        };
        if !seen.insert(id.clone()) {
            return Err(config_err(format!("[[{section}]] has duplicate task id '{id}'")));
        }

        let mut spec = TaskSpec::with_id(id, task.kind.clone());
        spec.enabled = task.enabled;
        spec.params = task.params.clone();
        flow.push(spec);
    }

    Ok(flow)
}

/// Parse durations like `"500ms"`, `"2s"`, `"5m"`, `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        _ => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn defaults_apply_to_an_empty_file() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.engine.program, "maa");
        assert_eq!(cfg.engine.runner.monitor.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.engine.runner.monitor.stale_after, Duration::from_secs(300));
        assert_eq!(cfg.engine.runner.launch_settle_delay, Duration::from_secs(15));
        assert!(cfg.flow.is_empty());
        assert!(cfg.schedule.is_none());
    }

    #[test]
    fn flow_capabilities_and_schedule_are_loaded() {
        let cfg = parse(
            r#"
            [engine]
            poll_interval = "500ms"

            [capability.infrast]
            type = "Infrast"
            keep_as_text = ["mode"]
            list_fields = ["facility"]

            [[flow]]
            id = "start"
            kind = "startup"
            params = { client_type = "Official" }

            [[flow]]
            kind = "fight"
            enabled = false
            params = { stage = "1-7", medicine = 2 }

            [[flow]]
            kind = "infrast"
            params = { mode = "0", threshold = "0.3" }

            [schedule]
            enabled = true
            times = ["16:00", "04:00"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.engine.runner.monitor.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.flow.len(), 3);
        assert_eq!(cfg.flow.at(0).unwrap().id().as_str(), "start");
        assert!(!cfg.flow.at(1).unwrap().enabled);
        assert!(cfg.catalog.contains("infrast"));

        let schedule = cfg.schedule.unwrap();
        assert_eq!(schedule.times.len(), 2);
        assert_eq!(schedule.flow, cfg.flow);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let cases = [
            r#"[[flow]]
               kind = "warp""#,
            r#"[capability.fight]
               type = "Fight""#,
            r#"[schedule]
               times = ["25:99"]"#,
            r#"[engine]
               poll_interval = "0s""#,
            r#"[engine]
               stale_after = "five minutes""#,
            r#"[[flow]]
               id = "x"
               kind = "fight"
               [[flow]]
               id = "x"
               kind = "fight""#,
        ];
        for src in cases {
            assert!(
                matches!(parse(src), Err(AutoflowError::Config(_))),
                "expected config error for:\n{src}"
            );
        }
    }

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("3d").is_err());
    }
}
