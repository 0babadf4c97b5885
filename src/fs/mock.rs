// src/fs/mock.rs

use super::{drop_partial_first_line, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory filesystem for tests.
///
/// Clones share the same backing map, so a test can keep one handle to
/// inspect what the code under test wrote. `fail_writes` makes every write
/// fail, to exercise persistence error paths.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.lock().insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock()
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writes_fail(&self) -> bool {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MockFileSystem {
    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match self.lock().get(path) {
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|e| anyhow!("Invalid UTF-8 in {:?}: {}", path, e)),
            None => Ok(None),
        }
    }

    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Option<String>> {
        let files = self.lock();
        let Some(bytes) = files.get(path) else {
            return Ok(None);
        };
        let start = bytes.len().saturating_sub(max_bytes as usize);
        let text = String::from_utf8_lossy(&bytes[start..]).into_owned();
        Ok(Some(drop_partial_first_line(text, start > 0)))
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.writes_fail() {
            return Err(anyhow!("simulated write failure for {:?}", path));
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if self.writes_fail() {
            return Err(anyhow!("simulated remove failure for {:?}", path));
        }
        self.lock().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }
}
