//! Live page content.
//!
//! `write_content` must be atomic per page: a reader sees the old page or the
//! new page, never a mix. Rollback correctness rests on that guarantee.

use crate::error::Result;
use crate::io;
use crate::paths;
use crate::types::PageContent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait ContentStore: Send + Sync {
    fn read_content(&self, page_id: &str) -> Result<Option<PageContent>>;
    fn write_content(&self, content: &PageContent) -> Result<()>;
}

/// One JSON file per page under a root directory.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn page_path(&self, page_id: &str) -> Result<PathBuf> {
        paths::validate_id(page_id)?;
        Ok(self
            .root
            .join(format!("{}.json", paths::page_key(page_id))))
    }
}

impl ContentStore for FsContentStore {
    fn read_content(&self, page_id: &str) -> Result<Option<PageContent>> {
        let path = self.page_path(page_id)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_content(&self, content: &PageContent) -> Result<()> {
        let path = self.page_path(&content.page_id)?;
        let data = serde_json::to_vec_pretty(content)?;
        io::atomic_write(&path, &data)
    }
}

#[derive(Default)]
pub struct MemoryContentStore {
    pages: Mutex<HashMap<String, PageContent>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryContentStore {
    fn read_content(&self, page_id: &str) -> Result<Option<PageContent>> {
        let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pages.get(page_id).cloned())
    }

    fn write_content(&self, content: &PageContent) -> Result<()> {
        paths::validate_id(&content.page_id)?;
        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        pages.insert(content.page_id.clone(), content.clone());
        Ok(())
    }
}
