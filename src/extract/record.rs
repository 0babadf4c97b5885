// src/extract/record.rs

//! Locating recognition records in a foreign, line-oriented log.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static HEADER_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\]")
        .expect("static regex is valid")
});

/// One record line whose embedded object was recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// 1-based line number within the snapshot.
    pub line: usize,
    pub recorded_at: Option<NaiveDateTime>,
    /// The `{ "what": <signature>, "details": ... }` object.
    pub record: Value,
    pub done: bool,
}

impl LogRecord {
    pub fn details(&self) -> Option<&Value> {
        self.record.get("details")
    }
}

/// All lines mentioning `signature`, split into parsed records and the
/// reasons the remaining ones could not be parsed.
#[derive(Debug, Default)]
pub struct Scan {
    pub records: Vec<LogRecord>,
    pub rejected: Vec<String>,
}

impl Scan {
    /// The last record marked done, else the last record seen.
    pub fn best(&self) -> Option<&LogRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.done)
            .or_else(|| self.records.last())
    }
}

pub fn scan(log: &str, signature: &str) -> Scan {
    let mut scan = Scan::default();
    for (idx, line) in log.lines().enumerate() {
        if !line.contains(signature) {
            continue;
        }
        match parse_line(line, signature) {
            Some(record) => {
                let done = record
                    .get("details")
                    .and_then(|d| d.get("done"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                scan.records.push(LogRecord {
                    line: idx + 1,
                    recorded_at: header_timestamp(line),
                    record,
                    done,
                });
            }
            None => {
                debug!(line = idx + 1, signature, "unparseable record line");
                scan.rejected
                    .push(format!("line {}: no parseable {signature} object", idx + 1));
            }
        }
    }
    scan
}

fn header_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = HEADER_TIMESTAMP.captures(line)?;
    let raw = caps.get(1)?.as_str();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Try the raw line first, then with one level of quote escaping removed.
fn parse_line(line: &str, signature: &str) -> Option<Value> {
    find_in_text(line, signature, 0).or_else(|| {
        let unescaped = unescape(line);
        if unescaped == line {
            None
        } else {
            find_in_text(&unescaped, signature, 0)
        }
    })
}

fn unescape(text: &str) -> String {
    text.replace("\\\\", "\u{0}").replace("\\\"", "\"").replace('\u{0}', "\\")
}

const MAX_NESTING: usize = 4;

/// Parse a JSON value at each `{` in turn and search it for the record.
fn find_in_text(text: &str, signature: &str, depth: usize) -> Option<Value> {
    if depth > MAX_NESTING {
        return None;
    }
    for (start, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = values.next() {
            if let Some(found) = find_in_value(value, signature, depth) {
                return Some(found);
            }
        }
    }
    None
}

/// Depth-first search for an object whose `what` is the signature. String
/// fields mentioning the signature are parsed as embedded JSON.
fn find_in_value(value: Value, signature: &str, depth: usize) -> Option<Value> {
    match value {
        Value::Object(map) => {
            if map.get("what").and_then(Value::as_str) == Some(signature) {
                return Some(Value::Object(map));
            }
            map.into_iter()
                .find_map(|(_, v)| find_in_value(v, signature, depth))
        }
        Value::Array(items) => items
            .into_iter()
            .find_map(|v| find_in_value(v, signature, depth)),
        Value::String(s) if s.contains(signature) => find_in_text(&s, signature, depth + 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_record_with_header() {
        let log = r#"[2024-05-01 10:00:01.250] INFO {"what":"DepotInfo","details":{"done":true}}"#;
        let scan = scan(log, "DepotInfo");
        assert_eq!(scan.records.len(), 1);
        let r = &scan.records[0];
        assert!(r.done);
        assert_eq!(
            r.recorded_at.map(|t| t.to_string()),
            Some("2024-05-01 10:00:01.250".to_string())
        );
    }

    #[test]
    fn escaped_record_is_unescaped() {
        let log = r#"callback: {\"what\":\"DepotInfo\",\"details\":{\"done\":false}}"#;
        let scan = scan(log, "DepotInfo");
        assert_eq!(scan.records.len(), 1);
        assert!(!scan.records[0].done);
    }

    #[test]
    fn record_wrapped_in_outer_string_field() {
        let inner = r#"{"what":"OperBoxInfo","details":{"done":true}}"#;
        let outer = serde_json::json!({ "msg": 20001, "payload": inner }).to_string();
        let scan = scan(&outer, "OperBoxInfo");
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].record["what"], "OperBoxInfo");
    }

    #[test]
    fn interleaved_noise_and_garbage_are_tolerated() {
        let log = "noise line\nDepotInfo {broken json\n[x] unrelated {\"what\":\"Other\"}\n";
        let scan = scan(log, "DepotInfo");
        assert!(scan.records.is_empty());
        assert_eq!(scan.rejected.len(), 1);
    }

    #[test]
    fn best_prefers_last_done_then_last() {
        let log = [
            r#"{"what":"DepotInfo","details":{"done":true,"n":1}}"#,
            r#"{"what":"DepotInfo","details":{"done":false,"n":2}}"#,
        ]
        .join("\n");
        let scan = scan(&log, "DepotInfo");
        assert_eq!(scan.best().unwrap().record["details"]["n"], 1);

        let partial = r#"{"what":"DepotInfo","details":{"n":3}}"#;
        let scan2 = super::scan(partial, "DepotInfo");
        assert_eq!(scan2.best().unwrap().record["details"]["n"], 3);
    }
}
