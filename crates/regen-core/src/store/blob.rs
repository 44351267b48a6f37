//! Key/blob storage used by the ledger.
//!
//! Keys are `/`-separated relative paths (`audit/2026-03-09.jsonl`,
//! `backups/strategy-plans/...json`). Nothing above this trait knows whether
//! a key maps to a file, an object-store entry, or a map slot.

use crate::error::{RegenError, Result};
use crate::io;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait BlobStore: Send + Sync {
    /// Create the blob at `key`; fails with `BackupExists` if it is taken.
    fn put_new(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Append `data` to the blob at `key`, creating it if missing.
    fn append(&self, key: &str, data: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove the blob at `key`. Returns false if it did not exist.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove empty containers under `prefix`. Returns how many were removed.
    fn prune_empty(&self, prefix: &str) -> Result<usize>;
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(RegenError::Storage(format!("invalid blob key '{key}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FsBlobStore
// ---------------------------------------------------------------------------

/// Blob store rooted at a directory; one file per key.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            // Skip in-flight tempfiles from atomic writes.
            if name.starts_with(".tmp") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }

    fn prune_dir(dir: &Path, keep: &Path) -> Result<usize> {
        let mut removed = 0;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                removed += Self::prune_dir(&entry.path(), keep)?;
            }
        }
        if dir != keep && std::fs::read_dir(dir)?.next().is_none() {
            // A concurrent writer may have just created a file here.
            match std::fs::remove_dir(dir) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "skip prune"),
            }
        }
        Ok(removed)
    }
}

impl BlobStore for FsBlobStore {
    fn put_new(&self, key: &str, data: &[u8]) -> Result<()> {
        io::write_new(&self.path_for(key)?, data)
    }

    fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        io::append_bytes(&self.path_for(key)?, data)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk only the deepest directory the prefix names completely.
        let dir_part = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };
        let mut keys = Vec::new();
        self.walk(&start, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn prune_empty(&self, prefix: &str) -> Result<usize> {
        let trimmed = prefix.trim_end_matches('/');
        let dir = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.path_for(trimmed)?
        };
        Self::prune_dir(&dir, &dir)
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-process blob store. Containers are implicit, so pruning is a no-op.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn put_new(&self, key: &str, data: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut blobs = self.lock();
        if blobs.contains_key(key) {
            return Err(RegenError::BackupExists(key.to_string()));
        }
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        check_key(key)?;
        self.lock()
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        Ok(self.lock().get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.lock().remove(key).is_some())
    }

    fn prune_empty(&self, _prefix: &str) -> Result<usize> {
        Ok(0)
    }
}
