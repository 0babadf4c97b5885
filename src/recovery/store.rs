// src/recovery/store.rs

//! Durable key-value persistence and the typed run-context layer on top.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::flow::RunContext;
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::StorageMode;

/// Key under which the active run context is stored.
pub const RUN_CONTEXT_KEY: &str = "run_context";

/// Abstract storage for JSON documents. Last write wins; no merging.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug)]
pub struct FileKeyValueStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileKeyValueStore {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_fs(dir, Arc::new(RealFileSystem))
    }

    pub fn with_fs(dir: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        Self { dir, fs }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let Some(text) = self.fs.read_optional(&path)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&text)
            .with_context(|| format!("parsing stored document {:?}", path))?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(value)?;
        self.fs.write_atomic(&path, &bytes)?;
        debug!(key, path = ?path, "stored document (file)");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.fs.remove(&self.path_for(key))?;
        debug!(key, "removed document (file)");
        Ok(())
    }
}

/// Stores documents in memory only.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), value.clone());
        debug!(key, "stored document (memory)");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}

/// Build the configured key-value store.
pub fn open_store(mode: StorageMode, dir: PathBuf) -> Arc<dyn KeyValueStore> {
    match mode {
        StorageMode::File => {
            info!(dir = ?dir, "using file-backed persistence");
            Arc::new(FileKeyValueStore::new(dir))
        }
        StorageMode::Memory => {
            info!("using in-memory persistence; runs will not survive a restart");
            Arc::new(MemoryKeyValueStore::new())
        }
    }
}

/// Result of reading the persisted run context.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRun {
    Absent,
    Present(RunContext),
    /// A document exists but cannot be trusted; it has been removed.
    Corrupt(String),
}

/// Overwrite-only persistence of the single active [`RunContext`].
#[derive(Clone)]
pub struct RecoveryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for RecoveryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStore").finish_non_exhaustive()
    }
}

impl RecoveryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Write the context, or clear it with `None`.
    pub fn save(&self, ctx: Option<&RunContext>) -> Result<()> {
        match ctx {
            Some(ctx) => {
                let value = serde_json::to_value(ctx)?;
                self.kv.save(RUN_CONTEXT_KEY, &value)?;
                debug!(
                    run_id = %ctx.run_id,
                    cursor = ctx.cursor,
                    phase = %ctx.phase,
                    "persisted run context"
                );
            }
            None => {
                self.kv.remove(RUN_CONTEXT_KEY)?;
                debug!("cleared persisted run context");
            }
        }
        Ok(())
    }

    pub fn load(&self) -> Result<Option<RunContext>> {
        match self.load_checked()? {
            StoredRun::Present(ctx) => Ok(Some(ctx)),
            StoredRun::Absent | StoredRun::Corrupt(_) => Ok(None),
        }
    }

    /// Load and validate the stored context.
    ///
    /// Documents that fail to parse or whose snapshot digest does not match
    /// are removed, so a broken document is reported once and never
    /// mistaken for a stuck run afterwards.
    pub fn load_checked(&self) -> Result<StoredRun> {
        let value = match self.kv.load(RUN_CONTEXT_KEY) {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(StoredRun::Absent),
            Err(e) => return self.discard(format!("unreadable document: {e}")),
        };

        let ctx: RunContext = match serde_json::from_value(value.clone()) {
            Ok(ctx) => ctx,
            Err(e) => return self.discard(format!("document does not describe a run: {e}")),
        };

        if !ctx.verify_stored(&value["flow_snapshot"]) {
            return self.discard(format!("snapshot digest mismatch for run {}", ctx.run_id));
        }

        Ok(StoredRun::Present(ctx))
    }

    fn discard(&self, reason: String) -> Result<StoredRun> {
        warn!(reason = %reason, "discarding persisted run context");
        self.kv.remove(RUN_CONTEXT_KEY)?;
        Ok(StoredRun::Corrupt(reason))
    }
}
