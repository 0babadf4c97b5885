use autoflow::config::{CapabilityConfig, ConfigFile, RawConfigFile, ScheduleSection, TaskConfig};
use autoflow::flow::{ParamValue, TaskFlow, TaskId, TaskSpec};

/// Builder for `TaskFlow` to simplify test setup.
///
/// `param` and `disabled` apply to the most recently added task.
#[derive(Debug, Default)]
pub struct TaskFlowBuilder {
    tasks: Vec<TaskSpec>,
}

impl TaskFlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, id: &str, kind: &str) -> Self {
        self.tasks.push(TaskSpec::with_id(TaskId::new(id), kind));
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        if let Some(last) = self.tasks.pop() {
            self.tasks.push(last.param(name, value));
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        if let Some(last) = self.tasks.last_mut() {
            last.enabled = false;
        }
        self
    }

    pub fn build(self) -> TaskFlow {
        self.tasks.into_iter().collect()
    }
}

/// Builder for `ConfigFile`, going through the same validation as a file.
#[derive(Debug, Default)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, id: &str, kind: &str) -> Self {
        self.config.flow.push(TaskConfig {
            id: Some(id.to_string()),
            kind: kind.to_string(),
            enabled: true,
            params: Default::default(),
        });
        self
    }

    pub fn with_capability(mut self, kind: &str, type_tag: &str) -> Self {
        self.config.capability.insert(
            kind.to_string(),
            CapabilityConfig {
                type_tag: type_tag.to_string(),
                ..CapabilityConfig::default()
            },
        );
        self
    }

    pub fn with_schedule(mut self, times: &[&str]) -> Self {
        self.config.schedule = Some(ScheduleSection {
            enabled: true,
            times: times.iter().map(|t| t.to_string()).collect(),
            flow: None,
        });
        self
    }

    pub fn with_poll_interval(mut self, raw: &str) -> Self {
        self.config.engine.poll_interval = raw.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
