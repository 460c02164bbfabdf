use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::store::path;

/// Describes one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub key: String,
    pub size: i64,
    pub modified: DateTime<Utc>,
}

/// Named byte streams with metadata.
///
/// Keys are slash-separated relative paths. Writers must be dropped (or
/// flushed) before the object is complete.
pub trait BlobStore: Send + Sync {
    /// Creates or truncates `key` and returns a writer for its contents.
    fn put_object(&self, key: &str) -> Result<Box<dyn Write + Send>>;

    /// Opens `key` for reading. Fails with `NotFound` if absent.
    fn get_object(&self, key: &str) -> Result<(Box<dyn Read + Send>, Metadata)>;

    /// Removes `key` and returns what it was, or `None` if it did not exist.
    fn delete_object(&self, key: &str) -> Result<Option<Metadata>>;

    /// Objects whose key starts with `prefix`, sorted by key.
    fn list_objects_with_prefix(&self, prefix: &str) -> Result<Vec<Metadata>>;

    fn list_objects(&self) -> Result<Vec<Metadata>> {
        self.list_objects_with_prefix("")
    }
}

/// A [`BlobStore`] rooted at a directory. Each key maps to a file; parent
/// directories are created on write and removed once emptied by a delete.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        tracing::debug!("Opened blob store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects empty and absolute keys and anything that cleans to a path
    /// outside the root.
    fn key_to_path(&self, key: &str) -> Result<(String, PathBuf)> {
        if key.is_empty() || key.starts_with('/') {
            return Err(AppError::InvalidKey);
        }
        let cleaned = path::clean(key);
        if cleaned == "." || cleaned == ".." || cleaned.starts_with("../") {
            return Err(AppError::InvalidKey);
        }
        let full = self.root.join(&cleaned);
        Ok((cleaned, full))
    }

    fn metadata(key: &str, file: &Path) -> Result<Metadata> {
        let info = match fs::metadata(file) {
            Ok(info) if info.is_file() => info,
            Ok(_) => return Err(AppError::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AppError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(Metadata {
            key: key.to_string(),
            size: info.len() as i64,
            modified: info.modified().map(DateTime::<Utc>::from)?,
        })
    }

    /// Removes now-empty directories from `dir` upwards, stopping at the root
    /// or at the first directory that still has entries.
    fn prune_empty_dirs(&self, mut dir: &Path) {
        while dir != self.root && dir.starts_with(&self.root) {
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => return,
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return,
            }
        }
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<Metadata>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let full = entry.path();
            let Ok(relative) = full.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                // Descend only where keys could still match.
                if key.starts_with(prefix) || prefix.starts_with(&format!("{}/", key)) {
                    self.walk(&full, prefix, out)?;
                }
            } else if file_type.is_file() && key.starts_with(prefix) {
                match Self::metadata(&key, &full) {
                    Ok(m) => out.push(m),
                    Err(AppError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn put_object(&self, key: &str) -> Result<Box<dyn Write + Send>> {
        let (_, file) = self.key_to_path(key)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(&file).map_err(|e| {
            tracing::error!("Failed to create {}: {}", file.display(), e);
            AppError::Io(e)
        })?;
        Ok(Box::new(f))
    }

    fn get_object(&self, key: &str) -> Result<(Box<dyn Read + Send>, Metadata)> {
        let (cleaned, file) = self.key_to_path(key)?;
        let meta = Self::metadata(&cleaned, &file)?;
        let f = match File::open(&file) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AppError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok((Box::new(f), meta))
    }

    fn delete_object(&self, key: &str) -> Result<Option<Metadata>> {
        let (cleaned, file) = self.key_to_path(key)?;
        let meta = match Self::metadata(&cleaned, &file) {
            Ok(m) => m,
            Err(AppError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = file.parent() {
            self.prune_empty_dirs(parent);
        }
        Ok(Some(meta))
    }

    fn list_objects_with_prefix(&self, prefix: &str) -> Result<Vec<Metadata>> {
        let mut out = Vec::new();
        self.walk(&self.root, prefix, &mut out)?;
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}
