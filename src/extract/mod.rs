// src/extract/mod.rs

//! Log extractor: recognition results scraped from the engine log.
//!
//! [`extract`] is total over its input: a log that is missing, truncated or
//! garbled yields an [`ExtractionError`], never a panic.

pub mod record;
pub mod reference;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fs::{FileSystem, RealFileSystem};
use crate::types::RecognitionKind;

pub use reference::{ReferenceData, ReferenceEntry, ReferenceTable};

/// Bytes read from the end of the engine log.
pub const DEFAULT_TAIL_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("engine log unavailable: {0}")]
    LogUnavailable(String),

    #[error("no {0} record found in the engine log")]
    NoRecord(RecognitionKind),

    #[error("malformed {kind} record: {reason}")]
    Malformed { kind: RecognitionKind, reason: String },

    #[error("{0} record carries no payload")]
    MissingPayload(RecognitionKind),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedItem {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// Derived view of the log; recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub kind: RecognitionKind,
    /// Item count for inventories, operator count for rosters.
    pub count: usize,
    pub items: Vec<RecognizedItem>,
    pub extracted_at: DateTime<Utc>,
    /// Whether the chosen record was marked done.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<NaiveDateTime>,
}

/// Extract the latest `kind` result from a log snapshot.
pub fn extract(
    kind: RecognitionKind,
    log: &str,
    references: &ReferenceTable,
    now: DateTime<Utc>,
) -> Result<RecognitionResult, ExtractionError> {
    let scan = record::scan(log, kind.signature());
    let Some(best) = scan.best() else {
        return Err(match scan.rejected.last() {
            Some(reason) => ExtractionError::Malformed {
                kind,
                reason: reason.clone(),
            },
            None => ExtractionError::NoRecord(kind),
        });
    };

    debug!(
        %kind,
        line = best.line,
        done = best.done,
        candidates = scan.records.len(),
        "selected log record"
    );

    let details = best.details().ok_or(ExtractionError::MissingPayload(kind))?;
    let raw = match kind {
        RecognitionKind::Inventory => inventory_entries(details)?,
        RecognitionKind::Roster => roster_entries(details)?,
    };

    let mut items: Vec<RecognizedItem> = raw.into_iter().map(|e| enrich(e, references)).collect();
    items.sort_by(compare_items);

    Ok(RecognitionResult {
        kind,
        count: items.len(),
        items,
        extracted_at: now,
        complete: best.done,
        recorded_at: best.recorded_at,
    })
}

/// An entry as found in the payload, before enrichment.
struct RawEntry {
    id: String,
    name: Option<String>,
    count: Option<u64>,
    attributes: BTreeMap<String, Value>,
}

fn malformed(kind: RecognitionKind, reason: impl Into<String>) -> ExtractionError {
    ExtractionError::Malformed {
        kind,
        reason: reason.into(),
    }
}

fn inventory_entries(details: &Value) -> Result<Vec<RawEntry>, ExtractionError> {
    let kind = RecognitionKind::Inventory;

    if let Some(lolicon) = details.get("lolicon") {
        if let Some(object) = lolicon.get("object").and_then(Value::as_object) {
            return counts_from_map(object);
        }
        if let Some(data) = lolicon.get("data").and_then(Value::as_str) {
            let parsed: Value = serde_json::from_str(data)
                .map_err(|e| malformed(kind, format!("lolicon.data: {e}")))?;
            let object = parsed
                .as_object()
                .ok_or_else(|| malformed(kind, "lolicon.data is not an object"))?;
            return counts_from_map(object);
        }
    }

    if let Some(items) = details
        .pointer("/arkplanner/object/items")
        .and_then(Value::as_array)
    {
        return items
            .iter()
            .map(|item| {
                let id = id_of(item).ok_or_else(|| malformed(kind, "arkplanner item without id"))?;
                let count = item
                    .get("have")
                    .and_then(count_of)
                    .ok_or_else(|| malformed(kind, format!("item {id} has no count")))?;
                Ok(RawEntry {
                    id,
                    name: None,
                    count: Some(count),
                    attributes: BTreeMap::new(),
                })
            })
            .collect();
    }

    Err(ExtractionError::MissingPayload(kind))
}

fn counts_from_map(object: &Map<String, Value>) -> Result<Vec<RawEntry>, ExtractionError> {
    object
        .iter()
        .map(|(id, value)| {
            let count = count_of(value).ok_or_else(|| {
                malformed(RecognitionKind::Inventory, format!("item {id} has count {value}"))
            })?;
            Ok(RawEntry {
                id: id.clone(),
                name: None,
                count: Some(count),
                attributes: BTreeMap::new(),
            })
        })
        .collect()
}

fn roster_entries(details: &Value) -> Result<Vec<RawEntry>, ExtractionError> {
    let kind = RecognitionKind::Roster;
    let opers = details
        .get("own_opers")
        .and_then(Value::as_array)
        .ok_or(ExtractionError::MissingPayload(kind))?;

    let mut entries = Vec::with_capacity(opers.len());
    for oper in opers {
        let object = oper
            .as_object()
            .ok_or_else(|| malformed(kind, "operator entry is not an object"))?;
        if object.get("own").and_then(Value::as_bool) == Some(false) {
            continue;
        }
        let id = id_of(oper).ok_or_else(|| malformed(kind, "operator without id"))?;
        let name = object.get("name").and_then(Value::as_str).map(str::to_string);
        let attributes = object
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "id" | "name" | "own"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.push(RawEntry {
            id,
            name,
            count: None,
            attributes,
        });
    }
    Ok(entries)
}

fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn enrich(raw: RawEntry, references: &ReferenceTable) -> RecognizedItem {
    match references.get(&raw.id) {
        Some(entry) => RecognizedItem {
            name: entry.name.clone(),
            icon_id: entry.icon_id.clone(),
            category: entry.category.clone(),
            sort_key: entry.sort_key,
            id: raw.id,
            count: raw.count,
            attributes: raw.attributes,
        },
        None => RecognizedItem {
            name: raw.name.unwrap_or_else(|| format!("Unknown ({})", raw.id)),
            icon_id: None,
            category: None,
            sort_key: None,
            id: raw.id,
            count: raw.count,
            attributes: raw.attributes,
        },
    }
}

/// Declared sort key first, entries without one last, ties by id.
fn compare_items(a: &RecognizedItem, b: &RecognizedItem) -> Ordering {
    match (a.sort_key, b.sort_key) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Reads the engine log and extracts results on demand.
pub struct LogExtractor {
    log_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    references: Arc<ReferenceData>,
    max_bytes: u64,
}

impl std::fmt::Debug for LogExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogExtractor")
            .field("log_path", &self.log_path)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl LogExtractor {
    pub fn new(log_path: PathBuf, references: Arc<ReferenceData>) -> Self {
        Self::with_fs(log_path, references, Arc::new(RealFileSystem))
    }

    pub fn with_fs(
        log_path: PathBuf,
        references: Arc<ReferenceData>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            log_path,
            fs,
            references,
            max_bytes: DEFAULT_TAIL_BYTES,
        }
    }

    /// Extract from the current log contents.
    pub async fn extract_latest(
        &self,
        kind: RecognitionKind,
    ) -> Result<RecognitionResult, ExtractionError> {
        let log = match self.fs.read_tail(&self.log_path, self.max_bytes) {
            Ok(Some(text)) => text,
            Ok(None) => {
                return Err(ExtractionError::LogUnavailable(format!(
                    "{} does not exist",
                    self.log_path.display()
                )));
            }
            Err(e) => return Err(ExtractionError::LogUnavailable(format!("{e:#}"))),
        };

        let references = self.references.table(kind).await;
        match extract(kind, &log, &references, Utc::now()) {
            Ok(result) => {
                info!(
                    %kind,
                    count = result.count,
                    complete = result.complete,
                    "extracted recognition result"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(%kind, error = %e, "extraction failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn refs() -> ReferenceTable {
        [
            ("30012", "Orirock Cube", 20),
            ("30011", "Orirock", 10),
            ("2001", "Drill Battle Record", 5),
        ]
        .into_iter()
        .map(|(id, name, key)| {
            (
                id.to_string(),
                ReferenceEntry {
                    name: name.to_string(),
                    icon_id: None,
                    category: Some("material".into()),
                    sort_key: Some(key),
                },
            )
        })
        .collect()
    }

    fn depot_line(details: Value) -> String {
        format!(
            "[2024-05-01 10:00:00] {}",
            json!({ "what": "DepotInfo", "details": details })
        )
    }

    #[test]
    fn done_record_wins_over_earlier_partial() {
        let log = [
            depot_line(json!({ "done": false, "lolicon": { "object": { "30011": 1 } } })),
            "unrelated noise".to_string(),
            depot_line(json!({
                "done": true,
                "lolicon": { "object": { "30011": 7, "30012": 3 } }
            })),
        ]
        .join("\n");

        let result = extract(RecognitionKind::Inventory, &log, &refs(), Utc::now()).unwrap();
        assert!(result.complete);
        assert_eq!(result.count, 2);
        assert_eq!(result.items[0].id, "30011");
        assert_eq!(result.items[0].count, Some(7));
        assert_eq!(result.items[1].name, "Orirock Cube");
    }

    #[test]
    fn escaped_data_string_is_decoded() {
        let data = json!({ "2001": "12", "99999": 4 }).to_string();
        let log = depot_line(json!({ "done": true, "lolicon": { "data": data } }));
        let result = extract(RecognitionKind::Inventory, &log, &refs(), Utc::now()).unwrap();
        let ids: Vec<_> = result.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2001", "99999"]);
        assert_eq!(result.items[1].name, "Unknown (99999)");
        assert_eq!(result.items[0].count, Some(12));
    }

    #[test]
    fn arkplanner_items_are_accepted() {
        let log = depot_line(json!({
            "done": true,
            "arkplanner": { "object": { "items": [ { "id": "30012", "have": 5 } ] } }
        }));
        let result = extract(RecognitionKind::Inventory, &log, &refs(), Utc::now()).unwrap();
        assert_eq!(result.items[0].count, Some(5));
    }

    #[test]
    fn roster_keeps_owned_operators_with_attributes() {
        let line = json!({
            "what": "OperBoxInfo",
            "details": {
                "done": true,
                "own_opers": [
                    {
                        "id": "char_002_amiya",
                        "name": "Amiya",
                        "elite": 2,
                        "level": 50,
                        "potential": 6,
                        "rarity": 5,
                        "own": true
                    },
                    { "id": "char_999_x", "name": "Missing", "own": false }
                ]
            }
        })
        .to_string();
        let result = extract(
            RecognitionKind::Roster,
            &line,
            &ReferenceTable::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.count, 1);
        let amiya = &result.items[0];
        assert_eq!(amiya.name, "Amiya");
        assert_eq!(amiya.count, None);
        assert_eq!(amiya.attributes["elite"], 2);
        assert!(!amiya.attributes.contains_key("own"));
    }

    #[test]
    fn errors_are_reported_not_raised() {
        let none = extract(RecognitionKind::Inventory, "nothing here", &refs(), Utc::now());
        assert_eq!(none, Err(ExtractionError::NoRecord(RecognitionKind::Inventory)));

        let garbled = extract(RecognitionKind::Inventory, "DepotInfo {{{", &refs(), Utc::now());
        assert!(matches!(garbled, Err(ExtractionError::Malformed { .. })));

        let empty = depot_line(json!({ "done": true }));
        assert_eq!(
            extract(RecognitionKind::Inventory, &empty, &refs(), Utc::now()),
            Err(ExtractionError::MissingPayload(RecognitionKind::Inventory))
        );

        let bad_data = depot_line(json!({ "lolicon": { "data": "{not json" } }));
        assert!(matches!(
            extract(RecognitionKind::Inventory, &bad_data, &refs(), Utc::now()),
            Err(ExtractionError::Malformed { .. })
        ));
    }
}
