use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the recovery store and schedule are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One JSON document per key under the storage directory.
    File,
    /// In memory only (lost on restart).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::File
    }
}

/// The two kinds of on-screen data the engine can recognise into its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionKind {
    Inventory,
    Roster,
}

impl RecognitionKind {
    /// Marker that identifies this kind's records in the engine log.
    pub fn signature(self) -> &'static str {
        match self {
            RecognitionKind::Inventory => "DepotInfo",
            RecognitionKind::Roster => "OperBoxInfo",
        }
    }
}

impl fmt::Display for RecognitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionKind::Inventory => f.write_str("inventory"),
            RecognitionKind::Roster => f.write_str("roster"),
        }
    }
}

impl FromStr for RecognitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inventory" | "depot" => Ok(RecognitionKind::Inventory),
            "roster" | "operbox" => Ok(RecognitionKind::Roster),
            other => Err(format!(
                "invalid recognition kind: {other} (expected \"inventory\" or \"roster\")"
            )),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOrigin {
    Manual,
    Scheduled,
    Recovered,
}

impl fmt::Display for RunOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOrigin::Manual => f.write_str("manual"),
            RunOrigin::Scheduled => f.write_str("scheduled"),
            RunOrigin::Recovered => f.write_str("recovered"),
        }
    }
}
