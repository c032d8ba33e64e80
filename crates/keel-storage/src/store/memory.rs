//! Memory-backed page store for tests.

use crate::node::PageRef;
use crate::store::PageStore;
use keel_common::{KeelError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// In-memory store with the same contract as the file-backed store but no
/// persistence. Offsets are indices into an append-only page vector rather
/// than byte positions.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemStoreInner>,
}

#[derive(Default)]
struct MemStoreInner {
    pages: Vec<PageRef>,
    last_key: u32,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of appended pages.
    pub fn page_count(&self) -> usize {
        self.inner.read().pages.len()
    }
}

impl PageStore for MemStore {
    fn append(&self, page: &PageRef) -> Result<()> {
        let mut inner = self.inner.write();
        page.write().set_file_offset(inner.pages.len() as u64);
        inner.pages.push(Arc::clone(page));
        Ok(())
    }

    fn update(&self, _page: &PageRef) -> Result<()> {
        Ok(())
    }

    fn fetch(&self, offset: u64) -> Result<PageRef> {
        let inner = self.inner.read();
        inner
            .pages
            .get(offset as usize)
            .cloned()
            .ok_or(KeelError::PageNotFound { offset })
    }

    fn last_key(&self) -> u32 {
        self.inner.read().last_key
    }

    fn increment_last_key(&self) -> u32 {
        let mut inner = self.inner.write();
        inner.last_key += 1;
        inner.last_key
    }

    fn next_lsn(&self) -> u64 {
        0
    }

    fn incr_lsn(&self) {}

    fn set_page_table_root(&self, _page: &PageRef) -> Result<()> {
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
