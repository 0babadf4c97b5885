// src/fs/mod.rs

//! Filesystem seam used by the persistence layer and the log reader, so
//! both can run against an in-memory mock in tests.

use std::fmt::Debug;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};

pub mod mock;

pub trait FileSystem: Send + Sync + Debug {
    /// Read a whole file; `Ok(None)` if it does not exist.
    fn read_optional(&self, path: &Path) -> Result<Option<String>>;

    /// Read at most the last `max_bytes` of a file, lossily decoded.
    /// `Ok(None)` if it does not exist.
    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Option<String>>;

    /// Replace a file's contents so readers see either the old or the new
    /// document, never a torn one.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Remove a file; missing files are not an error.
    fn remove(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading file {:?}", path)),
        }
    }

    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Option<String>> {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("opening file {:?}", path)),
        };

        let len = file
            .metadata()
            .with_context(|| format!("reading metadata of {:?}", path))?
            .len();
        let start = len.saturating_sub(max_bytes);
        file.seek(SeekFrom::Start(start))
            .with_context(|| format!("seeking in {:?}", path))?;

        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf)
            .with_context(|| format!("reading tail of {:?}", path))?;

        let text = String::from_utf8_lossy(&buf).into_owned();
        Ok(Some(drop_partial_first_line(text, start > 0)))
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
            }
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file =
                fs::File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
            file.write_all(contents)
                .with_context(|| format!("writing to file {:?}", tmp))?;
            file.sync_all()
                .with_context(|| format!("syncing file {:?}", tmp))?;
        }
        fs::rename(&tmp, path).with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing file {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// When reading from the middle of a file the first line is almost always
/// cut; drop it.
pub(crate) fn drop_partial_first_line(text: String, truncated: bool) -> String {
    if !truncated {
        return text;
    }
    match text.find('\n') {
        Some(idx) => text[idx + 1..].to_string(),
        None => String::new(),
    }
}
