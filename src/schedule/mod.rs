// src/schedule/mod.rs

//! Wall-clock trigger for scheduled runs.

pub mod trigger;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::errors::Result;
use crate::flow::TaskFlow;
use crate::recovery::KeyValueStore;

pub use trigger::SchedulerTrigger;

/// Key under which the active schedule is stored.
pub const SCHEDULE_KEY: &str = "schedule";

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, serialize_with = "ser_times", deserialize_with = "de_times")]
    pub times: BTreeSet<NaiveTime>,
    #[serde(default)]
    pub flow: TaskFlow,
}

impl ScheduleConfig {
    /// The configured time that falls in `(last_tick, now]`, if any.
    pub fn due(&self, last_tick: NaiveDateTime, now: NaiveDateTime) -> Option<NaiveTime> {
        if !self.enabled {
            return None;
        }
        due_time(&self.times, last_tick, now)
    }
}

/// First time of day `t` with `last_tick < d.and_time(t) <= now` for some
/// date `d` in the window. Windows spanning midnight check both days.
pub fn due_time(
    times: &BTreeSet<NaiveTime>,
    last_tick: NaiveDateTime,
    now: NaiveDateTime,
) -> Option<NaiveTime> {
    if now <= last_tick {
        return None;
    }
    let mut date = last_tick.date();
    while date <= now.date() {
        for &t in times {
            let at = date.and_time(t);
            if last_tick < at && at <= now {
                return Some(t);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

pub fn parse_time(raw: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|e| format!("invalid time of day '{raw}' (expected HH:MM): {e}"))
}

fn ser_times<S: Serializer>(
    times: &BTreeSet<NaiveTime>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(times.iter().map(|t| t.format(TIME_FORMAT).to_string()))
}

fn de_times<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<BTreeSet<NaiveTime>, D::Error> {
    let raw: Vec<String> = Vec::deserialize(d)?;
    raw.iter()
        .map(|s| parse_time(s).map_err(serde::de::Error::custom))
        .collect()
}

/// Typed persistence of the schedule on the shared key-value store.
#[derive(Clone)]
pub struct ScheduleStore {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleStore").finish_non_exhaustive()
    }
}

impl ScheduleStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn load(&self) -> Result<Option<ScheduleConfig>> {
        match self.kv.load(SCHEDULE_KEY)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, config: &ScheduleConfig) -> Result<()> {
        self.kv.save(SCHEDULE_KEY, &serde_json::to_value(config)?)?;
        debug!(times = config.times.len(), enabled = config.enabled, "persisted schedule");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.remove(SCHEDULE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::MemoryKeyValueStore;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn times(raw: &[&str]) -> BTreeSet<NaiveTime> {
        raw.iter().map(|s| parse_time(s).unwrap()).collect()
    }

    #[test]
    fn fires_once_when_crossing_the_time() {
        let t = times(&["04:00"]);
        assert_eq!(due_time(&t, at(3, 59, 59), at(4, 0, 0)), parse_time("04:00").ok());
        assert_eq!(due_time(&t, at(4, 0, 0), at(4, 0, 1)), None);
        assert_eq!(due_time(&t, at(3, 0, 0), at(3, 59, 0)), None);
    }

    #[test]
    fn crossing_midnight_is_handled() {
        let t = times(&["00:00"]);
        let before = at(23, 59, 59);
        let after = before + chrono::Duration::seconds(2);
        assert!(due_time(&t, before, after).is_some());
    }

    #[test]
    fn disabled_schedule_never_fires() {
        let config = ScheduleConfig {
            enabled: false,
            times: times(&["04:00"]),
            flow: TaskFlow::default(),
        };
        assert_eq!(config.due(at(3, 59, 0), at(4, 1, 0)), None);
    }

    #[test]
    fn bad_time_is_rejected() {
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("4pm").is_err());
    }

    #[test]
    fn store_round_trip_uses_hh_mm() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = ScheduleStore::new(kv.clone());
        let config = ScheduleConfig {
            enabled: true,
            times: times(&["16:00", "04:00"]),
            flow: TaskFlow::default(),
        };
        store.save(&config).unwrap();
        let raw = kv.load(SCHEDULE_KEY).unwrap().unwrap();
        assert_eq!(raw["times"], serde_json::json!(["04:00", "16:00"]));
        assert_eq!(store.load().unwrap(), Some(config));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
