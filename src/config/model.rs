// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::command::Catalog;
use crate::engine::RunnerOptions;
use crate::flow::{ParamValue, TaskFlow};
use crate::schedule::ScheduleConfig;
use crate::types::{RecognitionKind, StorageMode};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// program = "maa"
/// log_path = "/home/me/.local/share/maa/debug/asst.log"
///
/// [capability.infrast]
/// type = "Infrast"
/// keep_as_text = ["mode"]
///
/// [[flow]]
/// kind = "startup"
/// params = { client_type = "Official" }
///
/// [schedule]
/// enabled = true
/// times = ["04:05", "16:05"]
/// ```
///
/// Every section is optional. Validation into a [`ConfigFile`] happens in
/// `validate.rs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub reference: ReferenceSection,

    /// Dynamically configured capabilities from `[capability.<kind>]`.
    #[serde(default)]
    pub capability: BTreeMap<String, CapabilityConfig>,

    /// The default flow from `[[flow]]`, in execution order.
    #[serde(default)]
    pub flow: Vec<TaskConfig>,

    #[serde(default)]
    pub schedule: Option<ScheduleSection>,
}

/// `[engine]` section. Durations are strings like `"500ms"`, `"2s"`, `"5m"`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_program")]
    pub program: String,

    /// Engine log file scraped for recognition results.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Where structured task descriptors are written.
    #[serde(default = "default_task_dir")]
    pub task_dir: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,

    #[serde(default = "default_lost_contact_after")]
    pub lost_contact_after: String,

    #[serde(default = "default_settle_delay")]
    pub settle_delay: String,

    #[serde(default = "default_launch_settle_delay")]
    pub launch_settle_delay: String,

    #[serde(default = "default_stale_after")]
    pub stale_after: String,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: String,
}

fn default_program() -> String {
    "maa".to_string()
}

fn default_task_dir() -> PathBuf {
    PathBuf::from(".autoflow/tasks")
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_max_backoff() -> String {
    "10s".to_string()
}

fn default_lost_contact_after() -> String {
    "60s".to_string()
}

fn default_settle_delay() -> String {
    "2s".to_string()
}

fn default_launch_settle_delay() -> String {
    "15s".to_string()
}

fn default_stale_after() -> String {
    "5m".to_string()
}

fn default_stop_timeout() -> String {
    "10s".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            log_path: None,
            task_dir: default_task_dir(),
            poll_interval: default_poll_interval(),
            max_backoff: default_max_backoff(),
            lost_contact_after: default_lost_contact_after(),
            settle_delay: default_settle_delay(),
            launch_settle_delay: default_launch_settle_delay(),
            stale_after: default_stale_after(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub mode: StorageMode,

    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".autoflow")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            dir: default_storage_dir(),
        }
    }
}

/// `[reference]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReferenceSection {
    #[serde(default = "default_reference_dir")]
    pub dir: PathBuf,

    /// Base URL used only when a table is missing locally.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_reference_dir() -> PathBuf {
    PathBuf::from(".autoflow/reference")
}

impl Default for ReferenceSection {
    fn default() -> Self {
        Self {
            dir: default_reference_dir(),
            url: None,
        }
    }
}

/// `[capability.<kind>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityConfig {
    #[serde(rename = "type")]
    pub type_tag: String,

    #[serde(default)]
    pub keep_as_text: Vec<String>,

    #[serde(default)]
    pub list_fields: Vec<String>,

    #[serde(default)]
    pub launches_app: bool,

    #[serde(default)]
    pub recognition: Option<RecognitionKind>,
}

/// One `[[flow]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Stable id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    pub kind: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
}

fn default_enabled() -> bool {
    true
}

/// `[schedule]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSection {
    #[serde(default)]
    pub enabled: bool,

    /// `"HH:MM"` local times.
    #[serde(default)]
    pub times: Vec<String>,

    /// Flow for scheduled runs; the top-level `[[flow]]` when absent.
    #[serde(default)]
    pub flow: Option<Vec<TaskConfig>>,
}

/// Engine settings after validation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub program: String,
    pub log_path: Option<PathBuf>,
    pub task_dir: PathBuf,
    pub runner: RunnerOptions,
}

/// Validated configuration used by the rest of the application.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub storage: StorageSection,
    pub reference: ReferenceSection,
    pub catalog: Catalog,
    pub flow: TaskFlow,
    pub schedule: Option<ScheduleConfig>,
}

impl ConfigFile {
    /// Internal constructor used by validation.
    pub(crate) fn new_unchecked(
        engine: EngineSettings,
        storage: StorageSection,
        reference: ReferenceSection,
        catalog: Catalog,
        flow: TaskFlow,
        schedule: Option<ScheduleConfig>,
    ) -> Self {
        Self {
            engine,
            storage,
            reference,
            catalog,
            flow,
            schedule,
        }
    }
}
