// src/extract/reference.rs

//! Static id -> display data tables used to enrich recognition results.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::RecognitionKind;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub name: String,
    #[serde(default)]
    pub icon_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sort_key: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    entries: HashMap<String, ReferenceEntry>,
}

impl ReferenceTable {
    pub fn from_json(text: &str) -> Result<Self> {
        let entries: HashMap<String, ReferenceEntry> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ReferenceEntry)> for ReferenceTable {
    fn from_iter<I: IntoIterator<Item = (String, ReferenceEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn file_name(kind: RecognitionKind) -> &'static str {
    match kind {
        RecognitionKind::Inventory => "items.json",
        RecognitionKind::Roster => "operators.json",
    }
}

/// Lazily loaded reference tables, one per recognition kind.
///
/// A table is read from `dir` on first use; when absent locally and a
/// remote `url` is configured it is downloaded once and cached in `dir`.
/// A table that cannot be obtained is served empty (every id then degrades
/// to a placeholder name) and loading is retried on the next request.
pub struct ReferenceData {
    dir: PathBuf,
    url: Option<String>,
    fs: Arc<dyn FileSystem>,
    client: reqwest::Client,
    items: OnceCell<Arc<ReferenceTable>>,
    operators: OnceCell<Arc<ReferenceTable>>,
}

impl std::fmt::Debug for ReferenceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceData")
            .field("dir", &self.dir)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ReferenceData {
    pub fn new(dir: PathBuf, url: Option<String>) -> Self {
        Self::with_fs(dir, url, Arc::new(RealFileSystem))
    }

    pub fn with_fs(dir: PathBuf, url: Option<String>, fs: Arc<dyn FileSystem>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            dir,
            url,
            fs,
            client,
            items: OnceCell::new(),
            operators: OnceCell::new(),
        }
    }

    /// Preloaded tables, no disk or network access.
    pub fn preloaded(items: ReferenceTable, operators: ReferenceTable) -> Self {
        let data = Self::new(PathBuf::new(), None);
        // Freshly created cells cannot already be set.
        let _ = data.items.set(Arc::new(items));
        let _ = data.operators.set(Arc::new(operators));
        data
    }

    pub async fn table(&self, kind: RecognitionKind) -> Arc<ReferenceTable> {
        let cell = match kind {
            RecognitionKind::Inventory => &self.items,
            RecognitionKind::Roster => &self.operators,
        };
        match cell.get_or_try_init(|| self.load(kind)).await {
            Ok(table) => Arc::clone(table),
            Err(e) => {
                warn!(%kind, error = %e, "reference data unavailable; names will be placeholders");
                Arc::new(ReferenceTable::default())
            }
        }
    }

    async fn load(&self, kind: RecognitionKind) -> Result<Arc<ReferenceTable>> {
        let path = self.dir.join(file_name(kind));
        if let Some(text) = self.fs.read_optional(&path)? {
            let table = ReferenceTable::from_json(&text)?;
            info!(%kind, entries = table.len(), path = ?path, "loaded reference data");
            return Ok(Arc::new(table));
        }

        let Some(base) = &self.url else {
            return Err(anyhow!(
                "{} not found and no remote source configured",
                path.display()
            )
            .into());
        };

        let url = format!("{}/{}", base.trim_end_matches('/'), file_name(kind));
        info!(%kind, %url, "fetching reference data");
        let text = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let table = ReferenceTable::from_json(&text)?;

        if let Err(e) = self.fs.write_atomic(&path, text.as_bytes()) {
            warn!(error = %e, path = ?path, "failed to cache reference data locally");
        }
        Ok(Arc::new(table))
    }
}
